//! Finance handlers
//!
//! Accounts payable/receivable and expenses. An account's `overdue` status is
//! never stored: pending accounts past their due date are reported as overdue
//! when read.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;

use crate::entity::account::{self, STATUS_OVERDUE, STATUS_PAID, STATUS_PENDING, TYPE_PAYABLE, TYPE_RECEIVABLE};
use crate::entity::expense;
use crate::entity::system_audit_log::AuditAction;
use crate::error::{AppError, AppResult};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::AppState;

use super::{apply_patch, apply_patch_nullable, delete_or_404, find_or_404, require_one_of, require_text, Created};

const MODULE: &str = perm::FINANCE;
const ACCOUNT_TYPES: [&str; 2] = [TYPE_PAYABLE, TYPE_RECEIVABLE];
const STORED_STATUSES: [&str; 2] = [STATUS_PENDING, STATUS_PAID];

#[derive(Debug, Default, Deserialize)]
pub struct AccountFilter {
    #[serde(rename = "type")]
    pub account_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccount {
    pub description: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    #[serde(rename = "type")]
    pub account_type: String,
    pub status: Option<String>,
    pub entity_name: String,
    pub entity_id: Option<i32>,
    pub document_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccount {
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub due_date: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub account_type: Option<String>,
    pub status: Option<String>,
    pub entity_name: Option<String>,
    pub entity_id: Option<i32>,
    pub document_number: Option<String>,
}

fn validate_amount(amount: f64) -> AppResult<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(AppError::field("amount", "Valor deve ser maior que zero"))
    }
}

/// Keep accounts whose derived status matches the filter
pub fn filter_by_status(
    accounts: Vec<account::Model>,
    status: Option<&str>,
    today: NaiveDate,
) -> Vec<account::Model> {
    accounts
        .into_iter()
        .map(|a| a.with_effective_status(today))
        .filter(|a| status.map_or(true, |s| a.status == s))
        .collect()
}

/// GET /api/accounts
pub async fn list_accounts(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<AccountFilter>,
) -> AppResult<Json<Vec<account::Model>>> {
    let mut query = account::Entity::find();
    if let Some(kind) = filter.account_type.as_deref().filter(|s| !s.is_empty()) {
        query = query.filter(account::Column::AccountType.eq(kind));
    }
    let rows = query
        .order_by_asc(account::Column::DueDate)
        .all(&*db)
        .await?;
    let status = filter.status.as_deref().filter(|s| !s.is_empty());
    Ok(Json(filter_by_status(rows, status, crate::db::today())))
}

/// GET /api/accounts/:id
pub async fn get_account(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<account::Model>> {
    let found = find_or_404::<account::Entity, _>(&*db, id, "Conta").await?;
    Ok(Json(found.with_effective_status(crate::db::today())))
}

/// POST /api/accounts
pub async fn create_account(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateAccount>,
) -> AppResult<Created<account::Model>> {
    require_text("description", &req.description, "Descrição é obrigatória")?;
    require_text("entityName", &req.entity_name, "Favorecido é obrigatório")?;
    require_one_of("type", &req.account_type, &ACCOUNT_TYPES)?;
    validate_amount(req.amount)?;
    let status = req.status.unwrap_or_else(|| STATUS_PENDING.to_string());
    require_one_of("status", &status, &STORED_STATUSES)?;

    let created = account::ActiveModel {
        description: Set(req.description),
        amount: Set(req.amount),
        due_date: Set(req.due_date),
        account_type: Set(req.account_type),
        status: Set(status),
        entity_name: Set(req.entity_name),
        entity_id: Set(req.entity_id),
        document_number: Set(req.document_number),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "accounts", created.id, None);
    Ok(Created(created.with_effective_status(crate::db::today())))
}

/// PATCH /api/accounts/:id
pub async fn update_account(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(mut req): Json<UpdateAccount>,
) -> AppResult<Json<account::Model>> {
    if let Some(kind) = &req.account_type {
        require_one_of("type", kind, &ACCOUNT_TYPES)?;
    }
    if let Some(amount) = req.amount {
        validate_amount(amount)?;
    }
    // A client echoing back the derived status leaves the stored one alone
    if req.status.as_deref() == Some(STATUS_OVERDUE) {
        req.status = None;
    }
    if let Some(status) = &req.status {
        require_one_of("status", status, &STORED_STATUSES)?;
    }

    let mut model: account::ActiveModel =
        find_or_404::<account::Entity, _>(&*db, id, "Conta").await?.into();
    apply_patch!(model, req; description, amount, due_date, account_type, status, entity_name);
    apply_patch_nullable!(model, req; entity_id, document_number);
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "accounts", id, None);
    Ok(Json(updated.with_effective_status(crate::db::today())))
}

/// POST /api/accounts/:id/pay
pub async fn pay_account(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<account::Model>> {
    let found = find_or_404::<account::Entity, _>(&*db, id, "Conta").await?;
    if found.status == STATUS_PAID {
        return Err(AppError::BadRequest("Conta já está paga".to_string()));
    }

    let mut model: account::ActiveModel = found.into();
    model.status = Set(STATUS_PAID.to_string());
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "accounts",
        id,
        Some(serde_json::json!({"status": STATUS_PAID})),
    );
    Ok(Json(updated))
}

/// DELETE /api/accounts/:id
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<account::Entity, _>(&*db, id, "Conta").await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "accounts", id, None);
    Ok(status)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpense {
    pub description: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub payment_date: Option<NaiveDate>,
    pub category: String,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_info: Option<serde_json::Value>,
    pub cost_center: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExpense {
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub is_recurring: Option<bool>,
    pub recurrence_info: Option<serde_json::Value>,
    pub cost_center: Option<String>,
}

/// GET /api/expenses
pub async fn list_expenses(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<expense::Model>>> {
    let rows = expense::Entity::find()
        .order_by_desc(expense::Column::DueDate)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/expenses/:id
pub async fn get_expense(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<expense::Model>> {
    Ok(Json(find_or_404::<expense::Entity, _>(&*db, id, "Despesa").await?))
}

/// POST /api/expenses
pub async fn create_expense(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateExpense>,
) -> AppResult<Created<expense::Model>> {
    require_text("description", &req.description, "Descrição é obrigatória")?;
    require_text("category", &req.category, "Categoria é obrigatória")?;
    validate_amount(req.amount)?;

    let created = expense::ActiveModel {
        description: Set(req.description),
        amount: Set(req.amount),
        due_date: Set(req.due_date),
        payment_date: Set(req.payment_date),
        category: Set(req.category),
        is_recurring: Set(req.is_recurring),
        recurrence_info: Set(req.recurrence_info),
        cost_center: Set(req.cost_center),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "expenses", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/expenses/:id
pub async fn update_expense(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateExpense>,
) -> AppResult<Json<expense::Model>> {
    if let Some(amount) = req.amount {
        validate_amount(amount)?;
    }
    let mut model: expense::ActiveModel =
        find_or_404::<expense::Entity, _>(&*db, id, "Despesa").await?.into();
    apply_patch!(model, req; description, amount, due_date, category, is_recurring);
    apply_patch_nullable!(model, req; payment_date, recurrence_info, cost_center);
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "expenses", id, None);
    Ok(Json(updated))
}

/// DELETE /api/expenses/:id
pub async fn delete_expense(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<expense::Entity, _>(&*db, id, "Despesa").await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "expenses", id, None);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i32, status: &str, due: NaiveDate) -> account::Model {
        account::Model {
            id,
            description: "Fornecedor".into(),
            amount: 100.0,
            due_date: due,
            account_type: TYPE_PAYABLE.into(),
            status: status.into(),
            entity_name: "ACME".into(),
            entity_id: None,
            document_number: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    #[test]
    fn test_overdue_is_derived() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let past = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let future = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let rows = vec![
            account(1, STATUS_PENDING, past),
            account(2, STATUS_PENDING, future),
            account(3, STATUS_PAID, past),
        ];

        let overdue = filter_by_status(rows.clone(), Some(STATUS_OVERDUE), today);
        assert_eq!(overdue.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1]);

        let pending = filter_by_status(rows.clone(), Some(STATUS_PENDING), today);
        assert_eq!(pending.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2]);

        let all = filter_by_status(rows, None, today);
        assert_eq!(all[0].status, STATUS_OVERDUE);
        assert_eq!(all[2].status, STATUS_PAID);
    }

    #[test]
    fn test_amount_validation() {
        assert!(validate_amount(10.0).is_ok());
        assert!(validate_amount(0.0).is_err());
        assert!(validate_amount(-1.0).is_err());
        assert!(validate_amount(f64::INFINITY).is_err());
    }
}
