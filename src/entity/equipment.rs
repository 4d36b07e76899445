//! Equipment entity
//!
//! Table: equipment

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const CRITICALITIES: [&str; 3] = ["high", "medium", "low"];
pub const STATUSES: [&str; 3] = ["operational", "maintenance", "broken"];

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "equipment")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub model: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub serial_number: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub manufacturer: Option<String>,
    pub purchase_date: Option<Date>,
    #[sea_orm(column_type = "Text")]
    pub sector: String,
    #[sea_orm(column_type = "Text", column_name = "type")]
    #[serde(rename = "type")]
    pub equipment_type: String,
    #[sea_orm(column_type = "Text")]
    pub criticality: String,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
