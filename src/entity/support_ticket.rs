//! Support ticket entity
//!
//! Table: support_tickets

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_OPEN: &str = "aberto";
pub const STATUS_IN_PROGRESS: &str = "em_andamento";
pub const STATUS_RESOLVED: &str = "resolvido";
pub const STATUS_CLOSED: &str = "fechado";
pub const STATUSES: [&str; 4] = [STATUS_OPEN, STATUS_IN_PROGRESS, STATUS_RESOLVED, STATUS_CLOSED];

pub const PRIORITY_NORMAL: &str = "normal";
pub const PRIORITIES: [&str; 4] = ["baixa", PRIORITY_NORMAL, "alta", "urgente"];

/// Statuses that stamp `closed_at`
pub fn is_terminal(status: &str) -> bool {
    status == STATUS_RESOLVED || status == STATUS_CLOSED
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "support_tickets")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    #[sea_orm(column_type = "Text")]
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    #[sea_orm(column_type = "Text")]
    pub priority: String,
    /// Requester
    pub user_id: i32,
    pub assigned_to: Option<i32>,
    /// hardware, software, acesso, outro
    #[sea_orm(column_type = "Text")]
    pub category: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub resolution: Option<String>,
    pub closed_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    Requester,
}

impl ActiveModelBehavior for ActiveModel {}
