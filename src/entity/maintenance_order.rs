//! Maintenance order entity
//!
//! Table: maintenance_orders

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_OPEN: &str = "open";
pub const STATUS_IN_PROGRESS: &str = "in-progress";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "maintenance_orders")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text", unique)]
    pub order_number: String,
    pub equipment_id: Option<i32>,
    /// preventive or corrective
    #[sea_orm(column_type = "Text", column_name = "type")]
    #[serde(rename = "type")]
    pub order_type: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    /// high, medium, low
    #[sea_orm(column_type = "Text")]
    pub urgency: String,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    pub scheduled_date: Option<Date>,
    pub completion_date: Option<Date>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::equipment::Entity",
        from = "Column::EquipmentId",
        to = "super::equipment::Column::Id"
    )]
    Equipment,
}

impl ActiveModelBehavior for ActiveModel {}
