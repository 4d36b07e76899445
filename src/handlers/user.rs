//! User administration handlers
//!
//! Admin-only listing, update, deletion, password reset and permission edits

use axum::{extract::Path, http::StatusCode, Extension, Json};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;

use crate::entity::system_audit_log::AuditAction;
use crate::entity::user::{self, UserResponse};
use crate::error::{AppError, AppResult, OptionExt};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::{perm, Permissions};

use super::{apply_patch, delete_or_404, find_or_404};

const MODULE: &str = "admin";
const RESOURCE: &str = "Usuário";

/// Partial user update
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionsRequest {
    pub permissions: Option<Permissions>,
}

/// GET /api/users
pub async fn list_users(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<UserResponse>>> {
    current_user.require(perm::ADMIN)?;

    let users = user::Entity::find()
        .order_by_asc(user::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// PATCH /api/users/:id
pub async fn update_user(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    current_user.require(perm::ADMIN)?;

    let existing = find_or_404::<user::Entity, _>(&*db, id, RESOURCE).await?;
    let mut model: user::ActiveModel = existing.into();

    if let Some(permissions) = &req.permissions {
        model.permissions = Set(permissions.to_json());
    }
    apply_patch!(model, req; username, full_name, email, role, active);

    let updated = model.update(&*db).await?;
    record(&current_user, AuditAction::Update, MODULE, "users", id, None);
    Ok(Json(updated.into()))
}

/// DELETE /api/users/:id
pub async fn delete_user(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    current_user.require(perm::ADMIN)?;

    if id == current_user.id {
        return Err(AppError::BadRequest(
            "Não é possível excluir o próprio usuário".to_string(),
        ));
    }

    let status = delete_or_404::<user::Entity, _>(&*db, id, RESOURCE).await?;
    record(&current_user, AuditAction::Delete, MODULE, "users", id, None);
    Ok(status)
}

/// PATCH /api/users/:id/password
pub async fn reset_password(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<PasswordRequest>,
) -> AppResult<Json<UserResponse>> {
    current_user.require(perm::ADMIN)?;

    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("Senha não fornecida".to_string()))?;

    let existing = find_or_404::<user::Entity, _>(&*db, id, RESOURCE).await?;
    let hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

    let mut active: user::ActiveModel = existing.into();
    active.password = Set(hash);
    let updated = active.update(&*db).await?;

    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "users",
        id,
        Some(serde_json::json!({"field": "password"})),
    );
    Ok(Json(updated.into()))
}

/// PATCH /api/users/:idOrUsername/permissions
pub async fn update_permissions(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(key): Path<String>,
    Json(req): Json<PermissionsRequest>,
) -> AppResult<Json<UserResponse>> {
    current_user.require(perm::ADMIN)?;

    let permissions = req
        .permissions
        .ok_or_else(|| AppError::BadRequest("Permissões não fornecidas".to_string()))?;

    let existing = match key.parse::<i32>() {
        Ok(id) => user::Entity::find_by_id(id).one(&*db).await?,
        Err(_) => {
            user::Entity::find()
                .filter(user::Column::Username.eq(&key))
                .one(&*db)
                .await?
        }
    }
    .ok_or_not_found(RESOURCE)?;

    let id = existing.id;
    let before = existing.permissions.clone();
    let mut active: user::ActiveModel = existing.into();
    active.permissions = Set(permissions.to_json());
    let updated = active.update(&*db).await?;

    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "users",
        id,
        Some(serde_json::json!({"before": before, "after": updated.permissions})),
    );
    Ok(Json(updated.into()))
}
