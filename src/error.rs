use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, RuntimeErr};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Hides error details from responses once set
static PRODUCTION: AtomicBool = AtomicBool::new(false);

/// Switch response rendering to production mode
pub fn set_production(enabled: bool) {
    PRODUCTION.store(enabled, Ordering::Relaxed);
}

fn is_production() -> bool {
    PRODUCTION.load(Ordering::Relaxed)
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: BTreeMap<String, String>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} não encontrado")]
    NotFound(String),

    #[error("Não autenticado")]
    Unauthorized,

    /// 401 with a specific message, used by login
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Validation failure on a single field
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), message.clone());
        AppError::Validation { message, errors }
    }

    /// 403 with the default message
    pub fn forbidden() -> Self {
        AppError::Forbidden("Acesso negado".to_string())
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// SQLSTATE reported by PostgreSQL, if the error came from the driver
pub fn sql_state(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => e
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .map(|code| code.into_owned()),
        _ => None,
    }
}

/// User-facing message for integrity (23xxx) and schema (42xxx) errors.
/// Returns None for codes outside those classes.
pub fn describe_sql_state(code: &str) -> Option<&'static str> {
    match code {
        "23505" => Some("Registro duplicado"),
        "23503" => Some("Violação de chave estrangeira"),
        "42P01" => Some("Tabela não encontrada"),
        "42703" => Some("Coluna não encontrada"),
        c if c.starts_with("23") || c.starts_with("42") => Some("Erro de banco de dados"),
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let internal_detail = |msg: String| if is_production() { None } else { Some(msg) };

        let (status, message, errors, detail) = match self {
            AppError::Validation { message, errors } => {
                (StatusCode::BAD_REQUEST, message, Some(errors), None)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None, None),
            err @ AppError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string(), None, None),
            err @ AppError::Unauthorized => (StatusCode::UNAUTHORIZED, err.to_string(), None, None),
            AppError::InvalidCredentials(msg) => (StatusCode::UNAUTHORIZED, msg, None, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, None, None),
            AppError::Json(err) => (
                StatusCode::BAD_REQUEST,
                "Erro de validação".to_string(),
                None,
                Some(err.to_string()),
            ),
            AppError::Database(DbErr::RecordNotFound(what)) => {
                (StatusCode::NOT_FOUND, format!("{} não encontrado", what), None, None)
            }
            AppError::Database(err) => {
                match sql_state(&err).as_deref().and_then(describe_sql_state) {
                    Some(message) => {
                        tracing::warn!("Database constraint error: {}", err);
                        (StatusCode::BAD_REQUEST, message.to_string(), None, Some(err.to_string()))
                    }
                    None => {
                        tracing::error!("Database error: {}", err);
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Erro interno do servidor".to_string(),
                            None,
                            internal_detail(err.to_string()),
                        )
                    }
                }
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Erro interno do servidor".to_string(),
                    None,
                    internal_detail(msg),
                )
            }
        };

        let body = ErrorResponse {
            success: false,
            message,
            errors,
            detail,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for application
pub type AppResult<T> = Result<T, AppError>;

/// Helper trait for converting Option to AppError::NotFound
pub trait OptionExt<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(resource.into()))
    }
}

/// Helper to convert anyhow errors to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Fallback for unmatched API routes
pub async fn api_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("Rota {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_not_found_message() {
        let response = AppError::NotFound("Cotação".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Cotação não encontrado");
    }

    #[tokio::test]
    async fn test_validation_carries_field_errors() {
        let response = AppError::field("name", "Nome é obrigatório").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["errors"]["name"], "Nome é obrigatório");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::forbidden().into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Internal("boom".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Database(DbErr::RecordNotFound("Produto".into()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_describe_sql_state() {
        assert_eq!(describe_sql_state("23505"), Some("Registro duplicado"));
        assert_eq!(describe_sql_state("23503"), Some("Violação de chave estrangeira"));
        assert_eq!(describe_sql_state("42P01"), Some("Tabela não encontrada"));
        assert_eq!(describe_sql_state("42703"), Some("Coluna não encontrada"));
        assert_eq!(describe_sql_state("23502"), Some("Erro de banco de dados"));
        assert_eq!(describe_sql_state("08006"), None);
    }

    #[test]
    fn test_non_driver_error_has_no_sql_state() {
        assert_eq!(sql_state(&DbErr::Custom("x".into())), None);
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_not_found("Item");
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
