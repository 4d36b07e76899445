//! Raw material entity
//!
//! Table: raw_materials

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stock level label shown next to a material
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Critical,
    Low,
    Ok,
}

impl StockLevel {
    pub fn classify(current: f64, minimum: f64) -> Self {
        if current <= 0.0 {
            StockLevel::Critical
        } else if current < minimum {
            StockLevel::Low
        } else {
            StockLevel::Ok
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "raw_materials")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    #[sea_orm(column_type = "Text", unique)]
    pub code: String,
    /// kg, l, pcs...
    #[sea_orm(column_type = "Text")]
    pub unit: String,
    #[sea_orm(column_type = "Double")]
    pub current_stock: f64,
    #[sea_orm(column_type = "Double")]
    pub minimum_stock: f64,
    /// Last purchase price per unit
    #[sea_orm(column_type = "Double")]
    pub price: f64,
    #[sea_orm(column_type = "Text", nullable)]
    pub location_in_warehouse: Option<String>,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn stock_level(&self) -> StockLevel {
        StockLevel::classify(self.current_stock, self.minimum_stock)
    }

    pub fn is_below_minimum(&self) -> bool {
        self.current_stock < self.minimum_stock
    }
}

/// Material with its stock label
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMaterialResponse {
    #[serde(flatten)]
    pub material: Model,
    pub stock_level: StockLevel,
}

impl From<Model> for RawMaterialResponse {
    fn from(material: Model) -> Self {
        let stock_level = material.stock_level();
        Self {
            material,
            stock_level,
        }
    }
}
