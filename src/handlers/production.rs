//! Production handlers
//!
//! Products with their bill of materials, production orders and production
//! losses

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use std::collections::HashSet;

use crate::entity::system_audit_log::AuditAction;
use crate::entity::{product, product_formula, production_loss, production_order, raw_material};
use crate::error::{AppError, AppResult, OptionExt};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::AppState;

use super::{
    apply_patch, apply_patch_nullable, delete_or_404, find_or_404, require_one_of, require_text,
    Created,
};

const MODULE: &str = perm::PRODUCTION;

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProduct {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    #[serde(default)]
    pub unit_cost: f64,
    pub selling_price: Option<f64>,
    pub formula: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub unit_cost: Option<f64>,
    pub selling_price: Option<f64>,
    pub formula: Option<serde_json::Value>,
}

/// GET /api/products
pub async fn list_products(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<product::Model>>> {
    let products = product::Entity::find()
        .order_by_asc(product::Column::Name)
        .all(&*db)
        .await?;
    Ok(Json(products))
}

/// GET /api/products/:id
pub async fn get_product(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<product::Model>> {
    Ok(Json(find_or_404::<product::Entity, _>(&*db, id, "Produto").await?))
}

/// POST /api/products
pub async fn create_product(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateProduct>,
) -> AppResult<Created<product::Model>> {
    require_text("name", &req.name, "Nome é obrigatório")?;
    require_text("code", &req.code, "Código é obrigatório")?;

    let created = product::ActiveModel {
        name: Set(req.name),
        code: Set(req.code),
        description: Set(req.description),
        unit_cost: Set(req.unit_cost),
        selling_price: Set(req.selling_price),
        formula: Set(req.formula),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "products", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/products/:id
pub async fn update_product(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateProduct>,
) -> AppResult<Json<product::Model>> {
    let mut model: product::ActiveModel =
        find_or_404::<product::Entity, _>(&*db, id, "Produto").await?.into();
    apply_patch!(model, req; name, code, unit_cost);
    apply_patch_nullable!(model, req; description, selling_price, formula);
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "products", id, None);
    Ok(Json(updated))
}

/// DELETE /api/products/:id
pub async fn delete_product(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<product::Entity, _>(&*db, id, "Produto").await?;
    record(&current_user, AuditAction::Delete, MODULE, "products", id, None);
    Ok(status)
}

// ---------------------------------------------------------------------------
// Bill of materials
// ---------------------------------------------------------------------------

/// Raw material consumed by one unit of product
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaLine {
    pub material_id: i32,
    pub quantity: f64,
    pub unit: String,
    pub description: Option<String>,
}

fn validate_formula(lines: &[FormulaLine]) -> AppResult<()> {
    let mut seen = HashSet::new();
    for line in lines {
        if !line.quantity.is_finite() || line.quantity <= 0.0 {
            return Err(AppError::field("quantity", "Quantidade deve ser maior que zero"));
        }
        require_text("unit", &line.unit, "Unidade é obrigatória")?;
        if !seen.insert(line.material_id) {
            return Err(AppError::field("materialId", "Matéria-prima repetida na fórmula"));
        }
    }
    Ok(())
}

/// Replace every formula line of a product
pub async fn replace_formula(
    db: &DatabaseConnection,
    product_id: i32,
    user_id: i32,
    lines: Vec<FormulaLine>,
) -> AppResult<Vec<product_formula::Model>> {
    validate_formula(&lines)?;

    let txn = db.begin().await?;
    product::Entity::find_by_id(product_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_not_found("Produto")?;
    if !lines.is_empty() {
        let ids: Vec<i32> = lines.iter().map(|l| l.material_id).collect();
        let expected = ids.len();
        let found = raw_material::Entity::find()
            .filter(raw_material::Column::Id.is_in(ids))
            .all(&txn)
            .await?;
        if found.len() != expected {
            return Err(AppError::NotFound("Matéria-prima".to_string()));
        }
    }

    product_formula::Entity::delete_many()
        .filter(product_formula::Column::ProductId.eq(product_id))
        .exec(&txn)
        .await?;
    let now = crate::db::now();
    let mut saved = Vec::with_capacity(lines.len());
    for line in lines {
        let row = product_formula::ActiveModel {
            product_id: Set(product_id),
            material_id: Set(line.material_id),
            quantity: Set(line.quantity),
            unit: Set(line.unit),
            description: Set(line.description),
            created_at: Set(now),
            created_by: Set(Some(user_id)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        saved.push(row);
    }
    txn.commit().await?;
    Ok(saved)
}

/// GET /api/products/:id/formula
pub async fn get_product_formula(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<product_formula::Model>>> {
    find_or_404::<product::Entity, _>(&*db, id, "Produto").await?;
    let lines = product_formula::Entity::find()
        .filter(product_formula::Column::ProductId.eq(id))
        .order_by_asc(product_formula::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(lines))
}

/// PUT /api/products/:id/formula
pub async fn update_product_formula(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(lines): Json<Vec<FormulaLine>>,
) -> AppResult<Json<Vec<product_formula::Model>>> {
    let saved = replace_formula(&db, id, current_user.id, lines).await?;
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "product_formulas",
        id,
        Some(serde_json::json!({"lines": saved.len()})),
    );
    Ok(Json(saved))
}

// ---------------------------------------------------------------------------
// Production orders
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductionOrder {
    pub order_number: String,
    pub product_id: Option<i32>,
    pub quantity: f64,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductionOrder {
    pub order_number: Option<String>,
    pub product_id: Option<i32>,
    pub quantity: Option<f64>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// GET /api/production-orders
pub async fn list_production_orders(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<production_order::Model>>> {
    let orders = production_order::Entity::find()
        .order_by_desc(production_order::Column::CreatedAt)
        .all(&*db)
        .await?;
    Ok(Json(orders))
}

/// GET /api/production-orders/:id
pub async fn get_production_order(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<production_order::Model>> {
    Ok(Json(
        find_or_404::<production_order::Entity, _>(&*db, id, "Ordem de produção").await?,
    ))
}

/// POST /api/production-orders
pub async fn create_production_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateProductionOrder>,
) -> AppResult<Created<production_order::Model>> {
    require_text("orderNumber", &req.order_number, "Número da ordem é obrigatório")?;
    let status = req.status.unwrap_or_else(|| "planned".to_string());
    require_one_of("status", &status, &production_order::STATUSES)?;

    let created = production_order::ActiveModel {
        order_number: Set(req.order_number),
        product_id: Set(req.product_id),
        quantity: Set(req.quantity),
        status: Set(status),
        start_date: Set(req.start_date),
        end_date: Set(req.end_date),
        notes: Set(req.notes),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "production_orders", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/production-orders/:id
pub async fn update_production_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateProductionOrder>,
) -> AppResult<Json<production_order::Model>> {
    if let Some(status) = &req.status {
        require_one_of("status", status, &production_order::STATUSES)?;
    }

    let mut model: production_order::ActiveModel =
        find_or_404::<production_order::Entity, _>(&*db, id, "Ordem de produção")
            .await?
            .into();
    apply_patch!(model, req; order_number, quantity, status);
    apply_patch_nullable!(model, req; product_id, start_date, end_date, notes);
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "production_orders", id, None);
    Ok(Json(updated))
}

/// DELETE /api/production-orders/:id
pub async fn delete_production_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status =
        delete_or_404::<production_order::Entity, _>(&*db, id, "Ordem de produção").await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "production_orders", id, None);
    Ok(status)
}

// ---------------------------------------------------------------------------
// Production losses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductionLoss {
    pub production_order_id: Option<i32>,
    pub quantity: f64,
    pub reason: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductionLoss {
    pub production_order_id: Option<i32>,
    pub quantity: Option<f64>,
    pub reason: Option<String>,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// GET /api/production-losses
pub async fn list_production_losses(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<production_loss::Model>>> {
    let losses = production_loss::Entity::find()
        .order_by_desc(production_loss::Column::Date)
        .all(&*db)
        .await?;
    Ok(Json(losses))
}

/// POST /api/production-losses
pub async fn create_production_loss(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateProductionLoss>,
) -> AppResult<Created<production_loss::Model>> {
    require_text("reason", &req.reason, "Motivo é obrigatório")?;

    let created = production_loss::ActiveModel {
        production_order_id: Set(req.production_order_id),
        quantity: Set(req.quantity),
        reason: Set(req.reason),
        date: Set(req.date),
        notes: Set(req.notes),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "production_losses", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/production-losses/:id
pub async fn update_production_loss(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateProductionLoss>,
) -> AppResult<Json<production_loss::Model>> {
    let mut model: production_loss::ActiveModel =
        find_or_404::<production_loss::Entity, _>(&*db, id, "Perda de produção")
            .await?
            .into();
    apply_patch!(model, req; quantity, reason, date);
    apply_patch_nullable!(model, req; production_order_id, notes);
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "production_losses", id, None);
    Ok(Json(updated))
}

/// DELETE /api/production-losses/:id
pub async fn delete_production_loss(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status =
        delete_or_404::<production_loss::Entity, _>(&*db, id, "Perda de produção").await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "production_losses", id, None);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn formula_line(material_id: i32, quantity: f64) -> FormulaLine {
        FormulaLine {
            material_id,
            quantity,
            unit: "kg".into(),
            description: None,
        }
    }

    fn product_model() -> product::Model {
        product::Model {
            id: 3,
            name: "Tampa".into(),
            code: "PRD-003".into(),
            description: None,
            unit_cost: 0.0,
            selling_price: None,
            formula: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    #[test]
    fn test_validate_formula() {
        assert!(validate_formula(&[]).is_ok());
        assert!(validate_formula(&[formula_line(1, 2.0), formula_line(2, 0.5)]).is_ok());
        assert!(validate_formula(&[formula_line(1, 0.0)]).is_err());
        assert!(validate_formula(&[formula_line(1, 1.0), formula_line(1, 2.0)]).is_err());
        let blank_unit = FormulaLine {
            unit: " ".into(),
            ..formula_line(1, 1.0)
        };
        assert!(validate_formula(&[blank_unit]).is_err());
    }

    #[tokio::test]
    async fn test_formula_with_unknown_material() {
        let steel = raw_material::Model {
            id: 1,
            name: "Aço".into(),
            code: "MP-001".into(),
            unit: "kg".into(),
            current_stock: 10.0,
            minimum_stock: 1.0,
            price: 8.0,
            location_in_warehouse: None,
            created_at: crate::db::now(),
            created_by: None,
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![product_model()]])
            .append_query_results([vec![steel]])
            .into_connection();
        let err = replace_formula(&db, 3, 1, vec![formula_line(1, 2.0), formula_line(2, 1.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_formula_for_missing_product() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<product::Model>::new()])
            .into_connection();
        let err = replace_formula(&db, 3, 1, vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
