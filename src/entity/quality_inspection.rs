//! Quality inspection entity
//!
//! Table: quality_inspections

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const TYPES: [&str; 3] = ["incoming", "outgoing", "in-process"];
pub const RESULTS: [&str; 3] = ["approved", "rejected", "pending"];

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quality_inspections")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub inspection_type: String,
    /// raw-material, product or production
    #[sea_orm(column_type = "Text")]
    pub reference_type: String,
    pub reference_id: i32,
    #[sea_orm(column_type = "Text")]
    pub result: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub inspection_date: Date,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
