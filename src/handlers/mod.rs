//! Request handlers module

use axum::{http::StatusCode, response::IntoResponse, Json};
use sea_orm::sea_query::{extension::postgres::PgExpr, Expr};
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, PrimaryKeyTrait};
use serde::Serialize;

use crate::error::{AppError, AppResult, OptionExt};

pub mod access;
pub mod alerts;
pub mod audit;
pub mod auth;
pub mod chat;
pub mod commercial;
pub mod company;
pub mod dashboard;
pub mod export;
pub mod finance;
pub mod fiscal;
pub mod hr;
pub mod inventory;
pub mod maintenance;
pub mod pricing;
pub mod production;
pub mod purchase;
pub mod quality;
pub mod support;
pub mod user;

/// Copy every `Some` field of a patch request onto an active model
macro_rules! apply_patch {
    ($model:ident, $patch:ident; $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = $patch.$field {
                $model.$field = sea_orm::Set(value);
            }
        )*
    };
}

/// Same as `apply_patch!` for nullable columns
macro_rules! apply_patch_nullable {
    ($model:ident, $patch:ident; $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = $patch.$field {
                $model.$field = sea_orm::Set(Some(value));
            }
        )*
    };
}

pub(crate) use apply_patch;
pub(crate) use apply_patch_nullable;

/// 201 response carrying the created row
pub struct Created<T>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::CREATED, Json(self.0)).into_response()
    }
}

/// Fetch a row by primary key or fail with 404
pub async fn find_or_404<E, C>(db: &C, id: i32, resource: &str) -> AppResult<E::Model>
where
    E: EntityTrait,
    C: ConnectionTrait,
    <E::PrimaryKey as PrimaryKeyTrait>::ValueType: From<i32>,
{
    E::find_by_id(id).one(db).await?.ok_or_not_found(resource)
}

/// Delete a row by primary key or fail with 404
pub async fn delete_or_404<E, C>(db: &C, id: i32, resource: &str) -> AppResult<StatusCode>
where
    E: EntityTrait,
    C: ConnectionTrait,
    <E::PrimaryKey as PrimaryKeyTrait>::ValueType: From<i32>,
{
    let result = E::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound(resource.to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Case-insensitive substring match on any of the columns
pub fn ilike_any<C>(columns: &[C], term: &str) -> Condition
where
    C: ColumnTrait,
{
    let pattern = format!("%{}%", term.trim());
    columns.iter().fold(Condition::any(), |cond, col| {
        cond.add(Expr::col(*col).ilike(pattern.clone()))
    })
}

/// Reject blank required text fields
pub fn require_text(field: &str, value: &str, message: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::field(field, message));
    }
    Ok(())
}

/// Reject values outside a fixed set
pub fn require_one_of(field: &str, value: &str, allowed: &[&str]) -> AppResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(AppError::field(
            field,
            format!("Valor inválido '{}'. Use: {}", value, allowed.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::product;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, QueryFilter, QueryTrait};

    #[test]
    fn test_require_one_of() {
        assert!(require_one_of("status", "open", &["open", "closed"]).is_ok());
        let err = require_one_of("status", "x", &["open", "closed"]).unwrap_err();
        assert_eq!(err.to_string(), "Valor inválido 'x'. Use: open, closed");
    }

    #[test]
    fn test_require_text() {
        assert!(require_text("name", "  ", "Nome é obrigatório").is_err());
        assert!(require_text("name", "Aço", "Nome é obrigatório").is_ok());
    }

    #[test]
    fn test_ilike_any_sql() {
        let sql = product::Entity::find()
            .filter(ilike_any(&[product::Column::Name, product::Column::Code], "aco"))
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""name" ILIKE '%aco%' OR "code" ILIKE '%aco%'"#));
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let result = delete_or_404::<product::Entity, _>(&db, 9, "Produto").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
