//! Purchase quotation entity
//!
//! Table: quotations

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status given to new quotations
pub const STATUS_OPEN: &str = "aberta";
pub const STATUS_CLOSED: &str = "fechada";
pub const STATUS_CANCELLED: &str = "cancelada";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quotations")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text", unique)]
    pub quotation_number: String,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    pub creation_date: Date,
    pub closing_date: Option<Date>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
