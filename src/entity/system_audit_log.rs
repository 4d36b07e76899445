//! System audit log entity
//!
//! Table: system_audit_logs

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audited action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_audit_logs")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: Option<i32>,

    /// create, update or delete
    #[sea_orm(column_type = "Text")]
    pub action: String,

    /// Affected table
    #[sea_orm(column_type = "Text")]
    pub entity_type: String,

    pub entity_id: Option<i32>,

    /// Change details (before/after)
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub details: Option<Json>,

    #[sea_orm(column_type = "Text", nullable)]
    pub ip_address: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub user_agent: Option<String>,

    pub timestamp: DateTime,

    #[sea_orm(column_type = "Text", nullable)]
    pub module: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
