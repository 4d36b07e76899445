//! Expense entity
//!
//! Table: expenses

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "expenses")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Double")]
    pub amount: f64,
    pub due_date: Date,
    pub payment_date: Option<Date>,
    #[sea_orm(column_type = "Text")]
    pub category: String,
    pub is_recurring: bool,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub recurrence_info: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub cost_center: Option<String>,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
