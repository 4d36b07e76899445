//! System alert entity
//!
//! Table: system_alerts

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_ACKNOWLEDGED: &str = "acknowledged";
pub const STATUS_RESOLVED: &str = "resolved";

pub const PRIORITY_HIGH: &str = "high";
pub const PRIORITY_MEDIUM: &str = "medium";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_alerts")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    /// high, medium, low
    #[sea_orm(column_type = "Text")]
    pub priority: String,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    /// Originating module: inventory, maintenance, finance...
    #[sea_orm(column_type = "Text")]
    pub module: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
    pub acknowledged_at: Option<DateTime>,
    pub acknowledged_by: Option<i32>,
    pub resolved_at: Option<DateTime>,
    pub resolved_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
