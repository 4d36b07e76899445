//! Account entity (payables and receivables)
//!
//! Table: accounts

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const TYPE_PAYABLE: &str = "payable";
pub const TYPE_RECEIVABLE: &str = "receivable";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PAID: &str = "paid";
pub const STATUS_OVERDUE: &str = "overdue";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Double")]
    pub amount: f64,
    pub due_date: Date,
    #[sea_orm(column_type = "Text", column_name = "type")]
    #[serde(rename = "type")]
    pub account_type: String,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    /// Customer or supplier name
    #[sea_orm(column_type = "Text")]
    pub entity_name: String,
    pub entity_id: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub document_number: Option<String>,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Stored status, with pending accounts past their due date read as overdue
    pub fn effective_status(&self, today: Date) -> &str {
        if self.status == STATUS_PENDING && self.due_date < today {
            STATUS_OVERDUE
        } else {
            &self.status
        }
    }

    pub fn with_effective_status(mut self, today: Date) -> Self {
        self.status = self.effective_status(today).to_string();
        self
    }
}
