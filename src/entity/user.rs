//! User entity
//!
//! Table: users

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::permission::{Permissions, ADMIN_ROLE};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text", unique)]
    pub username: String,

    /// bcrypt hash
    #[sea_orm(column_type = "Text")]
    #[serde(skip_serializing)]
    pub password: String,

    #[sea_orm(column_type = "Text")]
    pub full_name: String,

    #[sea_orm(column_type = "Text")]
    pub email: String,

    /// `admin` or `user`
    #[sea_orm(column_type = "Text", default_value = "user")]
    pub role: String,

    pub active: bool,

    /// Presence: online, away, busy, offline
    #[sea_orm(column_type = "Text", nullable)]
    pub status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub status_message: Option<String>,

    /// Module flag map
    #[sea_orm(column_type = "JsonBinary")]
    pub permissions: Json,

    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    pub fn permission_map(&self) -> Permissions {
        Permissions::from_json(&self.permissions)
    }
}

/// User without the password hash
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub active: bool,
    pub status: Option<String>,
    pub status_message: Option<String>,
    pub permissions: Permissions,
    pub created_at: DateTime,
}

impl From<Model> for UserResponse {
    fn from(model: Model) -> Self {
        let permissions = model.permission_map();
        Self {
            id: model.id,
            username: model.username,
            full_name: model.full_name,
            email: model.email,
            role: model.role,
            active: model.active,
            status: model.status,
            status_message: model.status_message,
            permissions,
            created_at: model.created_at,
        }
    }
}

/// Minimal user card used by chat listings
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub status: Option<String>,
}

impl From<Model> for UserSummary {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            full_name: model.full_name,
            status: model.status,
        }
    }
}
