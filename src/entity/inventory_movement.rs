//! Inventory movement entity
//!
//! Table: inventory. One row per stock entry or withdrawal.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const TYPE_IN: &str = "in";
pub const TYPE_OUT: &str = "out";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub material_id: Option<i32>,
    #[sea_orm(column_type = "Double")]
    pub quantity: f64,
    /// `in` or `out`
    #[sea_orm(column_type = "Text")]
    pub transaction_type: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub lot_number: Option<String>,
    pub expiration_date: Option<Date>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::raw_material::Entity",
        from = "Column::MaterialId",
        to = "super::raw_material::Column::Id"
    )]
    RawMaterial,
}

impl ActiveModelBehavior for ActiveModel {}
