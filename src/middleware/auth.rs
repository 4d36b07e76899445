//! Authentication middleware
//!
//! Resolves the session user for every request and rejects anonymous calls
//! to protected API routes.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::ops::Deref;
use tower_sessions::Session;

use crate::entity::user;
use crate::error::{AppError, AppResult};
use crate::permission::{self, Permissions, ADMIN_ROLE};
use crate::state::AppState;

/// Session key for storing the user id
pub const SESSION_USER_KEY: &str = "user_id";

/// Database connection wrapper for use in handlers via Extension
#[derive(Clone)]
pub struct DbConn(pub DatabaseConnection);

impl Deref for DbConn {
    type Target = DatabaseConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Extension to store current user in request
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub permissions: Permissions,
    /// Client address, from proxy headers
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl CurrentUser {
    pub fn from_model(model: user::Model, headers: &HeaderMap) -> Self {
        let permissions = model.permission_map();
        Self {
            id: model.id,
            username: model.username,
            full_name: model.full_name,
            role: model.role,
            permissions,
            ip: client_ip(headers),
            user_agent: header_value(headers, "user-agent"),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    /// Check if the user has a specific module flag
    pub fn has_permission(&self, flag: &str) -> bool {
        permission::has_permission(&self.role, &self.permissions, flag)
    }

    /// Fail with 403 unless the user holds `flag`
    pub fn require(&self, flag: &str) -> AppResult<()> {
        permission::ensure(&self.role, &self.permissions, flag)
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First address in X-Forwarded-For, else X-Real-IP
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
}

/// Paths that don't require authentication
pub fn is_public_path(path: &str) -> bool {
    // Only API routes are authenticated; the SPA and its assets are public.
    // `/ws` is gated by its own permission route layer.
    if !path.starts_with("/api") {
        return true;
    }

    matches!(
        path,
        "/api/login" | "/api/register" | "/api/logout" | "/api/health" | "/api/access"
    )
}

/// Authentication middleware
pub async fn auth_layer(
    State(state): State<AppState>,
    session: Session,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    request.extensions_mut().insert(DbConn(state.db.clone()));

    let user_id: Option<i32> = session.get(SESSION_USER_KEY).await.unwrap_or(None);

    if let Some(user_id) = user_id {
        match user::Entity::find_by_id(user_id).one(&state.db).await {
            Ok(Some(model)) if model.active => {
                let current_user = CurrentUser::from_model(model, request.headers());
                request.extensions_mut().insert(current_user);
            }
            Ok(_) => {
                tracing::warn!("Session references missing or inactive user {}", user_id);
            }
            Err(e) => {
                tracing::error!("Database error during auth: {}", e);
                return AppError::Database(e).into_response();
            }
        }
    }

    if !is_public_path(&path) && request.extensions().get::<CurrentUser>().is_none() {
        return AppError::Unauthorized.into_response();
    }

    next.run(request).await
}

/// Route-layer gate requiring one module flag
pub async fn require_permission(
    flag: &'static str,
    request: Request<Body>,
    next: Next,
) -> Response {
    let check = match request.extensions().get::<CurrentUser>() {
        Some(user) => user.require(flag),
        None => Err(AppError::Unauthorized),
    };
    match check {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::debug!("Permission '{}' denied for {}", flag, request.uri().path());
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/"));
        assert!(is_public_path("/dashboard/finance"));
        assert!(is_public_path("/ws"));
        assert!(is_public_path("/api/login"));
        assert!(is_public_path("/api/health"));
        assert!(!is_public_path("/api/user"));
        assert!(!is_public_path("/api/products"));
    }

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_current_user_checks() {
        let user = CurrentUser {
            id: 2,
            username: "ana".into(),
            full_name: "Ana".into(),
            role: "user".into(),
            permissions: Permissions::none().with("inventory", true),
            ip: None,
            user_agent: None,
        };
        assert!(user.require("inventory").is_ok());
        assert!(user.require("finance").is_err());
        assert!(user.require_admin().is_err());
    }
}
