//! Commercial handlers: customers and sales orders
//!
//! Order totals are always recomputed from the items; a client supplied
//! total is ignored.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entity::system_audit_log::AuditAction;
use crate::entity::{customer, order, order_item};
use crate::error::{AppError, AppResult};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::AppState;

use super::{
    apply_patch, apply_patch_nullable, delete_or_404, find_or_404, ilike_any, require_one_of,
    require_text, Created,
};

const MODULE: &str = perm::COMMERCIAL;

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CustomerFilter {
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRequest {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// GET /api/customers
pub async fn list_customers(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<CustomerFilter>,
) -> AppResult<Json<Vec<customer::Model>>> {
    let mut query = customer::Entity::find();
    if let Some(term) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        query = query.filter(ilike_any(
            &[customer::Column::Name, customer::Column::TaxId, customer::Column::Email],
            term,
        ));
    }
    let rows = query.order_by_asc(customer::Column::Name).all(&*db).await?;
    Ok(Json(rows))
}

/// GET /api/customers/:id
pub async fn get_customer(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<customer::Model>> {
    Ok(Json(find_or_404::<customer::Entity, _>(&*db, id, "Cliente").await?))
}

/// POST /api/customers
pub async fn create_customer(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CustomerRequest>,
) -> AppResult<Created<customer::Model>> {
    let name = req.name.unwrap_or_default();
    require_text("name", &name, "Nome é obrigatório")?;

    let created = customer::ActiveModel {
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

    record(&current_user, AuditAction::Create, MODULE, "customers", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/customers/:id
pub async fn update_customer(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<CustomerRequest>,
) -> AppResult<Json<customer::Model>> {
    let mut model: customer::ActiveModel =
        find_or_404::<customer::Entity, _>(&*db, id, "Cliente").await?.into();
    apply_patch!(model, req; name);
    apply_patch_nullable!(model, req; tax_id, contact_name, email, phone, address);
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "customers", id, None);
    Ok(Json(updated))
}

/// DELETE /api/customers/:id
pub async fn delete_customer(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<customer::Entity, _>(&*db, id, "Cliente").await?;
    record(&current_user, AuditAction::Delete, MODULE, "customers", id, None);
    Ok(status)
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: Option<i32>,
    pub quantity: f64,
    pub unit_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub order_number: String,
    pub customer_id: Option<i32>,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrder {
    pub order_number: Option<String>,
    pub customer_id: Option<i32>,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub notes: Option<String>,
    /// Replaces every item of the order when present
    pub items: Option<Vec<OrderItemInput>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

fn validate_items(items: &[OrderItemInput]) -> AppResult<()> {
    for (i, item) in items.iter().enumerate() {
        if !(item.quantity.is_finite() && item.quantity > 0.0) {
            return Err(AppError::field(
                format!("items[{}].quantity", i),
                "Quantidade deve ser maior que zero",
            ));
        }
        if !item.unit_price.is_finite() || item.unit_price < 0.0 {
            return Err(AppError::field(
                format!("items[{}].unitPrice", i),
                "Preço unitário inválido",
            ));
        }
    }
    Ok(())
}

/// Sum of quantity × unit price over the items
pub fn order_total(items: &[OrderItemInput]) -> f64 {
    items.iter().map(|i| i.quantity * i.unit_price).sum()
}

async fn insert_items<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    items: &[OrderItemInput],
) -> Result<Vec<order_item::Model>, DbErr> {
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let row = order_item::ActiveModel {
            order_id: Set(Some(order_id)),
            product_id: Set(item.product_id),
            quantity: Set(item.quantity),
            unit_price: Set(item.unit_price),
            total_price: Set(item.quantity * item.unit_price),
            created_at: Set(crate::db::now()),
            ..Default::default()
        }
        .insert(db)
        .await?;
        rows.push(row);
    }
    Ok(rows)
}

async fn items_of<C: ConnectionTrait>(db: &C, order_id: i32) -> Result<Vec<order_item::Model>, DbErr> {
    order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Id)
        .all(db)
        .await
}

/// GET /api/orders
pub async fn list_orders(Extension(db): Extension<DbConn>) -> AppResult<Json<Vec<order::Model>>> {
    let rows = order::Entity::find()
        .order_by_desc(order::Column::OrderDate)
        .order_by_desc(order::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/orders/:id
pub async fn get_order(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<OrderWithItems>> {
    let found = find_or_404::<order::Entity, _>(&*db, id, "Pedido").await?;
    let items = items_of(&*db, id).await?;
    Ok(Json(OrderWithItems { order: found, items }))
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateOrder>,
) -> AppResult<Created<OrderWithItems>> {
    require_text("orderNumber", &req.order_number, "Número do pedido é obrigatório")?;
    let status = req.status.unwrap_or_else(|| "new".to_string());
    require_one_of("status", &status, &order::STATUSES)?;
    validate_items(&req.items)?;

    let txn = db.begin().await?;
    let created = order::ActiveModel {
        order_number: Set(req.order_number),
        customer_id: Set(req.customer_id),
        order_date: Set(req.order_date.unwrap_or_else(crate::db::today)),
        delivery_date: Set(req.delivery_date),
        status: Set(status),
        total_amount: Set(order_total(&req.items)),
        notes: Set(req.notes),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    let items = insert_items(&txn, created.id, &req.items).await?;
    txn.commit().await?;

    state.invalidate_dashboard();
    record(
        &current_user,
        AuditAction::Create,
        MODULE,
        "orders",
        created.id,
        Some(serde_json::json!({"items": items.len(), "total": created.total_amount})),
    );
    Ok(Created(OrderWithItems { order: created, items }))
}

/// PATCH /api/orders/:id
pub async fn update_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateOrder>,
) -> AppResult<Json<OrderWithItems>> {
    if let Some(status) = &req.status {
        require_one_of("status", status, &order::STATUSES)?;
    }
    if let Some(items) = &req.items {
        validate_items(items)?;
    }

    let txn = db.begin().await?;
    let mut model: order::ActiveModel =
        find_or_404::<order::Entity, _>(&txn, id, "Pedido").await?.into();

    let items = match &req.items {
        Some(new_items) => {
            order_item::Entity::delete_many()
                .filter(order_item::Column::OrderId.eq(id))
                .exec(&txn)
                .await?;
            model.total_amount = Set(order_total(new_items));
            insert_items(&txn, id, new_items).await?
        }
        None => items_of(&txn, id).await?,
    };

    apply_patch!(model, req; order_number, order_date, status);
    apply_patch_nullable!(model, req; customer_id, delivery_date, notes);
    let updated = model.update(&txn).await?;
    txn.commit().await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "orders", id, None);
    Ok(Json(OrderWithItems { order: updated, items }))
}

/// DELETE /api/orders/:id
pub async fn delete_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<order::Entity, _>(&*db, id, "Pedido").await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "orders", id, None);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: f64, unit_price: f64) -> OrderItemInput {
        OrderItemInput {
            product_id: None,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn test_order_total() {
        assert_eq!(order_total(&[]), 0.0);
        assert_eq!(order_total(&[item(2.0, 10.0), item(1.5, 4.0)]), 26.0);
    }

    #[test]
    fn test_item_validation() {
        assert!(validate_items(&[item(1.0, 0.0)]).is_ok());
        assert!(validate_items(&[item(0.0, 5.0)]).is_err());
        assert!(validate_items(&[item(1.0, -5.0)]).is_err());

        match validate_items(&[item(1.0, 1.0), item(-1.0, 1.0)]) {
            Err(AppError::Validation { errors, .. }) => {
                assert!(errors.contains_key("items[1].quantity"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
