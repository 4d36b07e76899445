//! Authentication handlers
//!
//! Implements register, login, logout, and current user endpoints

use axum::{http::StatusCode, response::IntoResponse, Extension, Json};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use tower_sessions::Session;

use crate::entity::user::{self, UserResponse};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::SESSION_USER_KEY;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::{Permissions, DEFAULT_ROLE};
use crate::routes::ApiResponse;

use super::{require_text, Created};

const INVALID_CREDENTIALS: &str = "Credenciais inválidas";

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Registration request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    pub role: Option<String>,
    pub permissions: Option<Permissions>,
}

fn session_error(err: tower_sessions::session::Error) -> AppError {
    AppError::Internal(format!("Session error: {}", err))
}

async fn start_session(session: &Session, user_id: i32) -> AppResult<()> {
    session.cycle_id().await.map_err(session_error)?;
    session
        .insert(SESSION_USER_KEY, user_id)
        .await
        .map_err(session_error)
}

async fn set_presence(db: &DbConn, model: user::Model, status: &str) -> AppResult<user::Model> {
    let mut active: user::ActiveModel = model.into();
    active.status = Set(Some(status.to_string()));
    Ok(active.update(&**db).await?)
}

/// POST /api/register
pub async fn register(
    Extension(db): Extension<DbConn>,
    requester: Option<Extension<CurrentUser>>,
    session: Session,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Created<UserResponse>> {
    require_text("username", &req.username, "Usuário é obrigatório")?;
    require_text("password", &req.password, "Senha é obrigatória")?;

    let existing = user::Entity::find()
        .filter(user::Column::Username.eq(req.username.trim()))
        .one(&*db)
        .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("Usuário já existe".to_string()));
    }

    // Only an administrator may hand out roles and flags at creation time
    let by_admin = requester.as_ref().is_some_and(|Extension(u)| u.is_admin());
    let (role, permissions) = if by_admin {
        (
            req.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            req.permissions.unwrap_or_else(Permissions::none),
        )
    } else {
        (DEFAULT_ROLE.to_string(), Permissions::none())
    };

    let hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

    let full_name = if req.full_name.trim().is_empty() {
        req.username.trim().to_string()
    } else {
        req.full_name
    };

    let created = user::ActiveModel {
        username: Set(req.username.trim().to_string()),
        password: Set(hash),
        full_name: Set(full_name),
        email: Set(req.email),
        role: Set(role),
        active: Set(true),
        status: Set(Some("online".to_string())),
        status_message: Set(None),
        permissions: Set(permissions.to_json()),
        created_at: Set(crate::db::now()),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    if !by_admin {
        start_session(&session, created.id).await?;
    }

    tracing::info!("User registered: {}", created.username);
    Ok(Created(created.into()))
}

/// POST /api/login
pub async fn login(
    Extension(db): Extension<DbConn>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<UserResponse>> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidCredentials(INVALID_CREDENTIALS.to_string()));
    }

    let found = user::Entity::find()
        .filter(user::Column::Username.eq(&req.username))
        .one(&*db)
        .await?;

    let Some(db_user) = found else {
        tracing::warn!("Login failed: user not found - {}", req.username);
        return Err(AppError::InvalidCredentials(INVALID_CREDENTIALS.to_string()));
    };

    if !bcrypt::verify(&req.password, &db_user.password).unwrap_or(false) {
        tracing::warn!("Login failed: wrong password - {}", req.username);
        return Err(AppError::InvalidCredentials(INVALID_CREDENTIALS.to_string()));
    }

    if !db_user.active {
        tracing::warn!("Login failed: user inactive - {}", req.username);
        return Err(AppError::InvalidCredentials("Usuário inativo".to_string()));
    }

    start_session(&session, db_user.id).await?;
    let db_user = set_presence(&db, db_user, "online").await?;

    tracing::info!("User logged in: {}", db_user.username);
    Ok(Json(db_user.into()))
}

/// POST /api/logout
pub async fn logout(
    Extension(db): Extension<DbConn>,
    current_user: Option<Extension<CurrentUser>>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    if let Some(Extension(user)) = current_user {
        if let Some(model) = user::Entity::find_by_id(user.id).one(&*db).await? {
            set_presence(&db, model, "offline").await?;
        }
        tracing::info!("User logged out: {}", user.username);
    }

    session.flush().await.map_err(session_error)?;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success_msg("Logout realizado com sucesso")),
    ))
}

/// GET /api/user
pub async fn current_user(
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<UserResponse>> {
    let model = user::Entity::find_by_id(user.id)
        .one(&*db)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(model.into()))
}
