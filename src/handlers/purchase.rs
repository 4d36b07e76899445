//! Purchase handlers
//!
//! Suppliers, quotations, quotation items and the supplier offers made for
//! each item. Exactly one offer per item can be selected. Closing a quotation
//! lets the selected offers become the new raw material prices.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entity::quotation::{STATUS_CANCELLED, STATUS_CLOSED, STATUS_OPEN};
use crate::entity::supplier_quotation::{best_offer, total_price};
use crate::entity::system_audit_log::AuditAction;
use crate::entity::{quotation, quotation_item, raw_material, supplier, supplier_quotation};
use crate::error::{AppError, AppResult, OptionExt};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::AppState;

use super::{
    apply_patch, apply_patch_nullable, delete_or_404, find_or_404, ilike_any, require_one_of,
    require_text, Created,
};

const MODULE: &str = perm::PURCHASE;
const QUOTATION_STATUSES: [&str; 3] = [STATUS_OPEN, STATUS_CLOSED, STATUS_CANCELLED];

// ---------------------------------------------------------------------------
// Suppliers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SupplierFilter {
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierRequest {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// GET /api/suppliers
pub async fn list_suppliers(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<SupplierFilter>,
) -> AppResult<Json<Vec<supplier::Model>>> {
    let mut query = supplier::Entity::find();
    if let Some(term) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        query = query.filter(ilike_any(&[supplier::Column::Name, supplier::Column::TaxId], term));
    }
    let rows = query.order_by_asc(supplier::Column::Name).all(&*db).await?;
    Ok(Json(rows))
}

/// GET /api/suppliers/:id
pub async fn get_supplier(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<supplier::Model>> {
    Ok(Json(find_or_404::<supplier::Entity, _>(&*db, id, "Fornecedor").await?))
}

/// POST /api/suppliers
pub async fn create_supplier(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<SupplierRequest>,
) -> AppResult<Created<supplier::Model>> {
    let name = req.name.unwrap_or_default();
    require_text("name", &name, "Nome é obrigatório")?;

    let created = supplier::ActiveModel {
        name: Set(name),
        tax_id: Set(req.tax_id),
        contact_name: Set(req.contact_name),
        email: Set(req.email),
        phone: Set(req.phone),
        address: Set(req.address),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "suppliers", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/suppliers/:id
pub async fn update_supplier(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<SupplierRequest>,
) -> AppResult<Json<supplier::Model>> {
    let mut model: supplier::ActiveModel =
        find_or_404::<supplier::Entity, _>(&*db, id, "Fornecedor").await?.into();
    apply_patch!(model, req; name);
    apply_patch_nullable!(model, req; tax_id, contact_name, email, phone, address);
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "suppliers", id, None);
    Ok(Json(updated))
}

/// DELETE /api/suppliers/:id
pub async fn delete_supplier(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<supplier::Entity, _>(&*db, id, "Fornecedor").await?;
    record(&current_user, AuditAction::Delete, MODULE, "suppliers", id, None);
    Ok(status)
}

// ---------------------------------------------------------------------------
// Quotations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuotation {
    pub quotation_number: String,
    pub status: Option<String>,
    pub creation_date: Option<NaiveDate>,
    pub closing_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuotation {
    pub quotation_number: Option<String>,
    pub status: Option<String>,
    pub creation_date: Option<NaiveDate>,
    pub closing_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// GET /api/quotations
pub async fn list_quotations(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<quotation::Model>>> {
    let rows = quotation::Entity::find()
        .order_by_desc(quotation::Column::CreationDate)
        .order_by_desc(quotation::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/quotations/:id
pub async fn get_quotation(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<quotation::Model>> {
    Ok(Json(find_or_404::<quotation::Entity, _>(&*db, id, "Cotação").await?))
}

/// POST /api/quotations
pub async fn create_quotation(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateQuotation>,
) -> AppResult<Created<quotation::Model>> {
    require_text("quotationNumber", &req.quotation_number, "Número da cotação é obrigatório")?;
    let status = req.status.unwrap_or_else(|| STATUS_OPEN.to_string());
    require_one_of("status", &status, &QUOTATION_STATUSES)?;

    let created = quotation::ActiveModel {
        quotation_number: Set(req.quotation_number),
        status: Set(status),
        creation_date: Set(req.creation_date.unwrap_or_else(crate::db::today)),
        closing_date: Set(req.closing_date),
        notes: Set(req.notes),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "quotations", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/quotations/:id
pub async fn update_quotation(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateQuotation>,
) -> AppResult<Json<quotation::Model>> {
    if let Some(status) = &req.status {
        require_one_of("status", status, &QUOTATION_STATUSES)?;
    }
    let mut model: quotation::ActiveModel =
        find_or_404::<quotation::Entity, _>(&*db, id, "Cotação").await?.into();
    apply_patch!(model, req; quotation_number, status, creation_date);
    apply_patch_nullable!(model, req; closing_date, notes);
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "quotations", id, None);
    Ok(Json(updated))
}

/// DELETE /api/quotations/:id
pub async fn delete_quotation(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<quotation::Entity, _>(&*db, id, "Cotação").await?;
    record(&current_user, AuditAction::Delete, MODULE, "quotations", id, None);
    Ok(status)
}

/// Material price replaced by a selected offer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub id: i32,
    pub name: String,
    pub old_price: f64,
    pub new_price: f64,
}

#[derive(Debug, Serialize)]
pub struct AppliedPrices {
    pub message: String,
    pub materials: Vec<PriceChange>,
}

/// New price of every material whose item has a selected offer. When several
/// items share a material the last one wins.
pub fn price_changes(
    items: &[quotation_item::Model],
    selected: &[supplier_quotation::Model],
    materials: &[raw_material::Model],
) -> Vec<PriceChange> {
    let mut changes: Vec<PriceChange> = Vec::new();
    for item in items {
        let Some(material) = item
            .material_id
            .and_then(|id| materials.iter().find(|m| m.id == id))
        else {
            continue;
        };
        let Some(offer) = selected
            .iter()
            .find(|o| o.is_selected && o.quotation_item_id == Some(item.id))
        else {
            continue;
        };
        match changes.iter_mut().find(|c| c.id == material.id) {
            Some(change) => change.new_price = offer.unit_price,
            None => changes.push(PriceChange {
                id: material.id,
                name: material.name.clone(),
                old_price: material.price,
                new_price: offer.unit_price,
            }),
        }
    }
    changes
}

/// Copy the selected offers of a closed quotation onto material prices
pub async fn apply_prices(db: &DatabaseConnection, quotation_id: i32) -> AppResult<AppliedPrices> {
    let txn = db.begin().await?;
    let quote = find_or_404::<quotation::Entity, _>(&txn, quotation_id, "Cotação").await?;
    if quote.status != STATUS_CLOSED {
        return Err(AppError::BadRequest(
            "Apenas cotações fechadas podem ter seus preços aplicados".to_string(),
        ));
    }

    let items = quotation_item::Entity::find()
        .filter(quotation_item::Column::QuotationId.eq(quotation_id))
        .all(&txn)
        .await?;
    if items.is_empty() {
        return Err(AppError::BadRequest("Cotação não possui itens".to_string()));
    }
    let item_ids: Vec<i32> = items.iter().map(|i| i.id).collect();
    let selected = supplier_quotation::Entity::find()
        .filter(supplier_quotation::Column::QuotationItemId.is_in(item_ids))
        .filter(supplier_quotation::Column::IsSelected.eq(true))
        .all(&txn)
        .await?;
    let material_ids: Vec<i32> = items.iter().filter_map(|i| i.material_id).collect();
    let materials = if selected.is_empty() || material_ids.is_empty() {
        Vec::new()
    } else {
        raw_material::Entity::find()
            .filter(raw_material::Column::Id.is_in(material_ids))
            .all(&txn)
            .await?
    };

    let changes = price_changes(&items, &selected, &materials);
    for change in &changes {
        raw_material::Entity::update_many()
            .col_expr(raw_material::Column::Price, Expr::value(change.new_price))
            .filter(raw_material::Column::Id.eq(change.id))
            .exec(&txn)
            .await?;
    }
    txn.commit().await?;

    Ok(AppliedPrices {
        message: format!("Preços de {} materiais atualizados", changes.len()),
        materials: changes,
    })
}

/// POST /api/quotations/:id/apply-prices
pub async fn apply_quotation_prices(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<AppliedPrices>> {
    let applied = apply_prices(&db, id).await?;
    tracing::info!("Quotation {} applied {} material prices", id, applied.materials.len());
    state.invalidate_dashboard();
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "quotations",
        id,
        Some(serde_json::json!({"appliedPrices": applied.materials.len()})),
    );
    Ok(Json(applied))
}

// ---------------------------------------------------------------------------
// Quotation items
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuotationItem {
    pub quotation_id: i32,
    pub material_id: Option<i32>,
    pub quantity: f64,
    pub unit_measurement: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuotationItem {
    pub material_id: Option<i32>,
    pub quantity: Option<f64>,
    pub unit_measurement: Option<String>,
}

fn validate_quantity(quantity: f64) -> AppResult<()> {
    if quantity.is_finite() && quantity > 0.0 {
        Ok(())
    } else {
        Err(AppError::field("quantity", "Quantidade deve ser maior que zero"))
    }
}

/// GET /api/quotations/:id/items
pub async fn list_quotation_items(
    Extension(db): Extension<DbConn>,
    Path(quotation_id): Path<i32>,
) -> AppResult<Json<Vec<quotation_item::Model>>> {
    let rows = quotation_item::Entity::find()
        .filter(quotation_item::Column::QuotationId.eq(quotation_id))
        .order_by_asc(quotation_item::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// POST /api/quotation-items
pub async fn create_quotation_item(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateQuotationItem>,
) -> AppResult<Created<quotation_item::Model>> {
    validate_quantity(req.quantity)?;
    require_text("unitMeasurement", &req.unit_measurement, "Unidade é obrigatória")?;
    find_or_404::<quotation::Entity, _>(&*db, req.quotation_id, "Cotação").await?;

    let created = quotation_item::ActiveModel {
        quotation_id: Set(Some(req.quotation_id)),
        material_id: Set(req.material_id),
        quantity: Set(req.quantity),
        unit_measurement: Set(req.unit_measurement),
        created_at: Set(crate::db::now()),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "quotation_items", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/quotation-items/:id
pub async fn update_quotation_item(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateQuotationItem>,
) -> AppResult<Json<quotation_item::Model>> {
    if let Some(quantity) = req.quantity {
        validate_quantity(quantity)?;
    }
    let mut model: quotation_item::ActiveModel =
        find_or_404::<quotation_item::Entity, _>(&*db, id, "Item da cotação").await?.into();
    apply_patch!(model, req; quantity, unit_measurement);
    apply_patch_nullable!(model, req; material_id);
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "quotation_items", id, None);
    Ok(Json(updated))
}

/// DELETE /api/quotation-items/:id
pub async fn delete_quotation_item(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<quotation_item::Entity, _>(&*db, id, "Item da cotação").await?;
    record(&current_user, AuditAction::Delete, MODULE, "quotation_items", id, None);
    Ok(status)
}

// ---------------------------------------------------------------------------
// Supplier quotations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSupplierQuotation {
    pub quotation_item_id: i32,
    pub supplier_id: Option<i32>,
    pub unit_price: f64,
    #[serde(default)]
    pub freight: f64,
    #[serde(default)]
    pub taxes: f64,
    pub total_price: Option<f64>,
    pub delivery_time: Option<i32>,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSupplierQuotation {
    pub supplier_id: Option<i32>,
    pub unit_price: Option<f64>,
    pub freight: Option<f64>,
    pub taxes: Option<f64>,
    pub total_price: Option<f64>,
    pub delivery_time: Option<i32>,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
}

async fn item_quantity<C: ConnectionTrait>(db: &C, item_id: Option<i32>) -> AppResult<f64> {
    let Some(item_id) = item_id else {
        return Ok(0.0);
    };
    let item = quotation_item::Entity::find_by_id(item_id)
        .one(db)
        .await?
        .ok_or_not_found("Item da cotação")?;
    Ok(item.quantity)
}

fn offers_of(item_id: i32) -> sea_orm::Select<supplier_quotation::Entity> {
    supplier_quotation::Entity::find()
        .filter(supplier_quotation::Column::QuotationItemId.eq(item_id))
}

/// GET /api/quotation-items/:id/supplier-quotations
pub async fn list_supplier_quotations(
    Extension(db): Extension<DbConn>,
    Path(item_id): Path<i32>,
) -> AppResult<Json<Vec<supplier_quotation::Model>>> {
    let rows = offers_of(item_id)
        .order_by_asc(supplier_quotation::Column::TotalPrice)
        .order_by_asc(supplier_quotation::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/quotation-items/:id/best
pub async fn best_supplier_quotation(
    Extension(db): Extension<DbConn>,
    Path(item_id): Path<i32>,
) -> AppResult<Json<supplier_quotation::Model>> {
    let offers = offers_of(item_id).all(&*db).await?;
    let best = best_offer(&offers).cloned().ok_or_not_found("Cotação de fornecedor")?;
    Ok(Json(best))
}

/// POST /api/supplier-quotations
pub async fn create_supplier_quotation(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateSupplierQuotation>,
) -> AppResult<Created<supplier_quotation::Model>> {
    if !req.unit_price.is_finite() || req.unit_price < 0.0 {
        return Err(AppError::field("unitPrice", "Preço unitário inválido"));
    }
    let quantity = item_quantity(&*db, Some(req.quotation_item_id)).await?;
    let total = req
        .total_price
        .unwrap_or_else(|| total_price(req.unit_price, quantity, req.freight, req.taxes));

    let created = supplier_quotation::ActiveModel {
        quotation_item_id: Set(Some(req.quotation_item_id)),
        supplier_id: Set(req.supplier_id),
        unit_price: Set(req.unit_price),
        freight: Set(req.freight),
        taxes: Set(req.taxes),
        total_price: Set(total),
        delivery_time: Set(req.delivery_time),
        payment_terms: Set(req.payment_terms),
        notes: Set(req.notes),
        is_selected: Set(false),
        created_at: Set(crate::db::now()),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "supplier_quotations", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/supplier-quotations/:id
pub async fn update_supplier_quotation(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateSupplierQuotation>,
) -> AppResult<Json<supplier_quotation::Model>> {
    let current =
        find_or_404::<supplier_quotation::Entity, _>(&*db, id, "Cotação de fornecedor").await?;

    let price_changed = req.unit_price.is_some() || req.freight.is_some() || req.taxes.is_some();
    let recomputed = match (req.total_price, price_changed) {
        (Some(total), _) => Some(total),
        (None, true) => {
            let quantity = item_quantity(&*db, current.quotation_item_id).await?;
            Some(total_price(
                req.unit_price.unwrap_or(current.unit_price),
                quantity,
                req.freight.unwrap_or(current.freight),
                req.taxes.unwrap_or(current.taxes),
            ))
        }
        (None, false) => None,
    };

    let mut model: supplier_quotation::ActiveModel = current.into();
    apply_patch!(model, req; unit_price, freight, taxes);
    apply_patch_nullable!(model, req; supplier_id, delivery_time, payment_terms, notes);
    if let Some(total) = recomputed {
        model.total_price = Set(total);
    }
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "supplier_quotations", id, None);
    Ok(Json(updated))
}

/// Mark an offer selected and unselect the other offers for the same item
pub async fn select_offer(
    db: &DatabaseConnection,
    id: i32,
) -> AppResult<supplier_quotation::Model> {
    let txn = db.begin().await?;
    let chosen =
        find_or_404::<supplier_quotation::Entity, _>(&txn, id, "Cotação de fornecedor").await?;

    if let Some(item_id) = chosen.quotation_item_id {
        supplier_quotation::Entity::update_many()
            .col_expr(supplier_quotation::Column::IsSelected, Expr::value(false))
            .filter(supplier_quotation::Column::QuotationItemId.eq(item_id))
            .filter(supplier_quotation::Column::Id.ne(id))
            .exec(&txn)
            .await?;
    }

    let mut model: supplier_quotation::ActiveModel = chosen.into();
    model.is_selected = Set(true);
    let selected = model.update(&txn).await?;
    txn.commit().await?;
    Ok(selected)
}

/// POST /api/supplier-quotations/:id/select
pub async fn select_supplier_quotation(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<supplier_quotation::Model>> {
    let selected = select_offer(&db, id).await?;
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "supplier_quotations",
        id,
        Some(serde_json::json!({"selected": true})),
    );
    Ok(Json(selected))
}

/// DELETE /api/supplier-quotations/:id
pub async fn delete_supplier_quotation(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status =
        delete_or_404::<supplier_quotation::Entity, _>(&*db, id, "Cotação de fornecedor").await?;
    record(&current_user, AuditAction::Delete, MODULE, "supplier_quotations", id, None);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn offer(id: i32, selected: bool) -> supplier_quotation::Model {
        supplier_quotation::Model {
            id,
            quotation_item_id: Some(7),
            supplier_id: Some(1),
            unit_price: 2.0,
            freight: 0.0,
            taxes: 0.0,
            total_price: 20.0,
            delivery_time: Some(5),
            payment_terms: None,
            notes: None,
            is_selected: selected,
            created_at: crate::db::now(),
        }
    }

    #[tokio::test]
    async fn test_item_quantity_missing_item() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<quotation_item::Model>::new()])
            .into_connection();
        assert!(matches!(
            item_quantity(&db, Some(99)).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(item_quantity(&db, None).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_select_offer() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![offer(2, false)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .append_query_results([vec![offer(2, true)]])
            .into_connection();
        let selected = select_offer(&db, 2).await.unwrap();
        assert!(selected.is_selected);
    }

    #[tokio::test]
    async fn test_select_missing_offer() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<supplier_quotation::Model>::new()])
            .into_connection();
        assert!(matches!(select_offer(&db, 9).await, Err(AppError::NotFound(_))));
    }

    fn quotation_model(status: &str) -> quotation::Model {
        quotation::Model {
            id: 1,
            quotation_number: "COT-001".into(),
            status: status.into(),
            creation_date: crate::db::today(),
            closing_date: None,
            notes: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn item(id: i32, material_id: Option<i32>) -> quotation_item::Model {
        quotation_item::Model {
            id,
            quotation_id: Some(1),
            material_id,
            quantity: 10.0,
            unit_measurement: "kg".into(),
            created_at: crate::db::now(),
        }
    }

    fn material(id: i32, price: f64) -> raw_material::Model {
        raw_material::Model {
            id,
            name: format!("Material {}", id),
            code: format!("MP-{:03}", id),
            unit: "kg".into(),
            current_stock: 0.0,
            minimum_stock: 0.0,
            price,
            location_in_warehouse: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn selected_offer(id: i32, item_id: i32, unit_price: f64) -> supplier_quotation::Model {
        supplier_quotation::Model {
            quotation_item_id: Some(item_id),
            unit_price,
            ..offer(id, true)
        }
    }

    #[test]
    fn test_price_changes() {
        let items = [item(7, Some(1)), item(8, Some(2)), item(9, None), item(10, Some(1))];
        let selected = [
            selected_offer(1, 7, 9.5),
            selected_offer(2, 9, 3.0),
            selected_offer(3, 10, 9.0),
            supplier_quotation::Model {
                is_selected: false,
                ..selected_offer(4, 8, 1.0)
            },
        ];
        let materials = [material(1, 10.0), material(2, 4.0)];

        let changes = price_changes(&items, &selected, &materials);
        assert_eq!(
            changes,
            vec![PriceChange {
                id: 1,
                name: "Material 1".into(),
                old_price: 10.0,
                new_price: 9.0,
            }]
        );
    }

    #[tokio::test]
    async fn test_apply_prices_requires_closed_quotation() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![quotation_model(STATUS_OPEN)]])
            .into_connection();
        let err = apply_prices(&db, 1).await.unwrap_err();
        assert_eq!(err.to_string(), "Apenas cotações fechadas podem ter seus preços aplicados");

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![quotation_model(STATUS_CLOSED)]])
            .append_query_results([Vec::<quotation_item::Model>::new()])
            .into_connection();
        let err = apply_prices(&db, 1).await.unwrap_err();
        assert_eq!(err.to_string(), "Cotação não possui itens");
    }

    #[tokio::test]
    async fn test_apply_prices_updates_materials() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![quotation_model(STATUS_CLOSED)]])
            .append_query_results([vec![item(7, Some(1))]])
            .append_query_results([vec![selected_offer(1, 7, 9.5)]])
            .append_query_results([vec![material(1, 10.0)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let applied = apply_prices(&db, 1).await.unwrap();
        assert_eq!(applied.materials.len(), 1);
        assert_eq!(applied.materials[0].old_price, 10.0);
        assert_eq!(applied.materials[0].new_price, 9.5);
        assert_eq!(applied.message, "Preços de 1 materiais atualizados");
    }
}
