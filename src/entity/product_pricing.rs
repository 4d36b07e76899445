//! Product pricing entity
//!
//! Table: product_pricing

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_pricing")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_id: Option<i32>,
    #[sea_orm(column_type = "Double")]
    pub raw_material_cost: f64,
    #[sea_orm(column_type = "Double")]
    pub labor_cost: f64,
    #[sea_orm(column_type = "Double")]
    pub overhead_cost: f64,
    #[sea_orm(column_type = "Double")]
    pub freight_cost: f64,
    #[sea_orm(column_type = "Double")]
    pub taxes: f64,
    /// Percent
    #[sea_orm(column_type = "Double")]
    pub profit_margin: f64,
    #[sea_orm(column_type = "Double")]
    pub total_cost: f64,
    #[sea_orm(column_type = "Double")]
    pub suggested_price: f64,
    /// Percent of the suggested price
    #[sea_orm(column_type = "Double")]
    pub margin: f64,
    pub calculation_date: Date,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id",
        on_delete = "Cascade"
    )]
    Product,
}

impl ActiveModelBehavior for ActiveModel {}
