//! Inventory handlers
//!
//! Raw materials and stock movements. A movement and the resulting stock
//! change are written in one transaction; dropping below the minimum raises
//! an inventory alert unless one is already open for the material.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entity::inventory_movement::{self, TYPE_IN, TYPE_OUT};
use crate::entity::raw_material::{self, RawMaterialResponse};
use crate::entity::system_alert::{self, PRIORITY_HIGH, PRIORITY_MEDIUM};
use crate::entity::system_audit_log::AuditAction;
use crate::error::{AppError, AppResult, OptionExt};
use crate::handlers::alerts::{has_open_alert, publish, raise_alert, NewAlert};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::pagination::{paginate_query, PageParams, PageQuery, Paginated, SortOrder};
use crate::permission::perm;
use crate::state::AppState;

use super::{apply_patch, apply_patch_nullable, delete_or_404, find_or_404, ilike_any, require_text, Created};

const MODULE: &str = perm::INVENTORY;
const RESOURCE: &str = "Matéria-prima";
const ALERT_REFERENCE: &str = "raw_material";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialFilter {
    pub search: Option<String>,
    pub low_stock: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRawMaterial {
    pub name: String,
    pub code: String,
    pub unit: String,
    #[serde(default)]
    pub current_stock: f64,
    #[serde(default)]
    pub minimum_stock: f64,
    #[serde(default)]
    pub price: f64,
    pub location_in_warehouse: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRawMaterial {
    pub name: Option<String>,
    pub code: Option<String>,
    pub unit: Option<String>,
    pub current_stock: Option<f64>,
    pub minimum_stock: Option<f64>,
    pub price: Option<f64>,
    pub location_in_warehouse: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMovement {
    pub material_id: i32,
    pub quantity: f64,
    pub transaction_type: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementFilter {
    pub material_id: Option<i32>,
}

/// Result of a stock movement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementResult {
    pub movement: inventory_movement::Model,
    pub material: RawMaterialResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<system_alert::Model>,
}

/// Stock after applying a movement
pub fn apply_movement(current: f64, quantity: f64, transaction_type: &str) -> AppResult<f64> {
    if quantity.is_nan() || quantity <= 0.0 {
        return Err(AppError::field("quantity", "Quantidade deve ser maior que zero"));
    }
    match transaction_type {
        TYPE_IN => Ok(current + quantity),
        TYPE_OUT if quantity > current => Err(AppError::BadRequest(format!(
            "Estoque insuficiente: disponível {}, solicitado {}",
            current, quantity
        ))),
        TYPE_OUT => Ok(current - quantity),
        other => Err(AppError::field(
            "transactionType",
            format!("Tipo de movimentação inválido '{}'. Use: in, out", other),
        )),
    }
}

/// Alert to raise for a material below its minimum, if any
pub fn low_stock_alert(material: &raw_material::Model) -> Option<NewAlert> {
    if !material.is_below_minimum() {
        return None;
    }
    let priority = if material.current_stock <= 0.0 {
        PRIORITY_HIGH
    } else {
        PRIORITY_MEDIUM
    };
    Some(NewAlert {
        message: format!(
            "Estoque baixo: {} ({}) com {} {} (mínimo {})",
            material.name,
            material.code,
            material.current_stock,
            material.unit,
            material.minimum_stock
        ),
        priority: Some(priority.to_string()),
        module: MODULE.to_string(),
        reference_type: Some(ALERT_REFERENCE.to_string()),
        reference_id: Some(material.id),
    })
}

/// Write a movement, update the material stock and raise a low-stock alert
pub async fn record_movement(
    db: &DatabaseConnection,
    user_id: Option<i32>,
    req: CreateMovement,
) -> AppResult<MovementResult> {
    let txn = db.begin().await?;

    let material = raw_material::Entity::find_by_id(req.material_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_not_found(RESOURCE)?;

    let new_stock = apply_movement(material.current_stock, req.quantity, &req.transaction_type)?;

    let movement = inventory_movement::ActiveModel {
        material_id: Set(Some(material.id)),
        quantity: Set(req.quantity),
        transaction_type: Set(req.transaction_type),
        reference_type: Set(req.reference_type),
        reference_id: Set(req.reference_id),
        lot_number: Set(req.lot_number),
        expiration_date: Set(req.expiration_date),
        notes: Set(req.notes),
        created_at: Set(crate::db::now()),
        created_by: Set(user_id),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let mut active: raw_material::ActiveModel = material.into();
    active.current_stock = Set(new_stock);
    let material = active.update(&txn).await?;

    let alert = match low_stock_alert(&material) {
        Some(new_alert)
            if !has_open_alert(&txn, MODULE, ALERT_REFERENCE, material.id).await? =>
        {
            Some(raise_alert(&txn, new_alert, user_id).await?)
        }
        _ => None,
    };

    txn.commit().await?;

    Ok(MovementResult {
        movement,
        material: material.into(),
        alert,
    })
}

/// GET /api/raw-materials
pub async fn list_raw_materials(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<MaterialFilter>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Paginated<RawMaterialResponse>>> {
    use raw_material::Column;

    let params = PageParams::from(page);
    let mut query = raw_material::Entity::find();
    if let Some(term) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        query = query.filter(ilike_any(&[Column::Name, Column::Code], term));
    }
    if filter.low_stock == Some(true) {
        query = query.filter(Expr::col(Column::CurrentStock).lt(Expr::col(Column::MinimumStock)));
    }

    let column = match params.sort_by.as_deref() {
        Some("code") => Column::Code,
        Some("currentStock") => Column::CurrentStock,
        Some("minimumStock") => Column::MinimumStock,
        Some("createdAt") => Column::CreatedAt,
        _ => Column::Name,
    };
    query = match params.sort_order {
        SortOrder::Asc => query.order_by_asc(column),
        SortOrder::Desc => query.order_by_desc(column),
    };

    let page = paginate_query(&*db, query, &params).await?;
    Ok(Json(page.map(RawMaterialResponse::from)))
}

/// GET /api/raw-materials/:id
pub async fn get_raw_material(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<RawMaterialResponse>> {
    let material = find_or_404::<raw_material::Entity, _>(&*db, id, RESOURCE).await?;
    Ok(Json(material.into()))
}

fn validate_price(price: f64) -> AppResult<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(AppError::field("price", "Preço não pode ser negativo"));
    }
    Ok(())
}

/// POST /api/raw-materials
pub async fn create_raw_material(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateRawMaterial>,
) -> AppResult<Created<RawMaterialResponse>> {
    require_text("name", &req.name, "Nome é obrigatório")?;
    require_text("code", &req.code, "Código é obrigatório")?;
    require_text("unit", &req.unit, "Unidade é obrigatória")?;
    validate_price(req.price)?;

    let created = raw_material::ActiveModel {
        name: Set(req.name),
        code: Set(req.code),
        unit: Set(req.unit),
        current_stock: Set(req.current_stock),
        minimum_stock: Set(req.minimum_stock),
        price: Set(req.price),
        location_in_warehouse: Set(req.location_in_warehouse),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "raw_materials", created.id, None);
    Ok(Created(created.into()))
}

/// PATCH /api/raw-materials/:id
pub async fn update_raw_material(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateRawMaterial>,
) -> AppResult<Json<RawMaterialResponse>> {
    if let Some(price) = req.price {
        validate_price(price)?;
    }
    let mut model: raw_material::ActiveModel =
        find_or_404::<raw_material::Entity, _>(&*db, id, RESOURCE).await?.into();
    apply_patch!(model, req; name, code, unit, current_stock, minimum_stock, price);
    apply_patch_nullable!(model, req; location_in_warehouse);
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "raw_materials", id, None);
    Ok(Json(updated.into()))
}

/// DELETE /api/raw-materials/:id
pub async fn delete_raw_material(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<raw_material::Entity, _>(&*db, id, RESOURCE).await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "raw_materials", id, None);
    Ok(status)
}

/// GET /api/inventory
pub async fn list_movements(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<MovementFilter>,
) -> AppResult<Json<Vec<inventory_movement::Model>>> {
    let mut query = inventory_movement::Entity::find();
    if let Some(material_id) = filter.material_id {
        query = query.filter(inventory_movement::Column::MaterialId.eq(material_id));
    }
    let rows = query
        .order_by_desc(inventory_movement::Column::CreatedAt)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// POST /api/inventory
pub async fn create_movement(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateMovement>,
) -> AppResult<Created<MovementResult>> {
    let result = record_movement(&db, Some(current_user.id), req).await?;

    if let Some(alert) = &result.alert {
        tracing::info!("Low stock alert raised for material {}", result.material.material.id);
        publish(alert);
    }
    state.invalidate_dashboard();
    record(
        &current_user,
        AuditAction::Create,
        MODULE,
        "inventory",
        result.movement.id,
        Some(serde_json::json!({
            "materialId": result.material.material.id,
            "type": result.movement.transaction_type,
            "quantity": result.movement.quantity,
            "stock": result.material.material.current_stock,
        })),
    );
    Ok(Created(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::raw_material::StockLevel;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn material(current: f64, minimum: f64) -> raw_material::Model {
        raw_material::Model {
            id: 5,
            name: "Resina".into(),
            code: "MP-005".into(),
            unit: "kg".into(),
            current_stock: current,
            minimum_stock: minimum,
            price: 12.5,
            location_in_warehouse: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price(0.0).is_ok());
        assert!(validate_price(18.9).is_ok());
        assert!(validate_price(-0.01).is_err());
        assert!(validate_price(f64::NAN).is_err());
    }

    #[test]
    fn test_apply_movement() {
        assert_eq!(apply_movement(10.0, 5.0, TYPE_IN).unwrap(), 15.0);
        assert_eq!(apply_movement(10.0, 10.0, TYPE_OUT).unwrap(), 0.0);
        assert!(matches!(
            apply_movement(10.0, 11.0, TYPE_OUT),
            Err(AppError::BadRequest(_))
        ));
        assert!(apply_movement(10.0, 0.0, TYPE_IN).is_err());
        assert!(apply_movement(10.0, f64::NAN, TYPE_IN).is_err());
        assert!(apply_movement(10.0, 1.0, "transfer").is_err());
    }

    #[test]
    fn test_low_stock_alert_priority() {
        assert!(low_stock_alert(&material(10.0, 5.0)).is_none());
        assert!(low_stock_alert(&material(5.0, 5.0)).is_none());

        let alert = low_stock_alert(&material(2.0, 5.0)).unwrap();
        assert_eq!(alert.priority.as_deref(), Some(PRIORITY_MEDIUM));
        assert_eq!(alert.reference_id, Some(5));

        let alert = low_stock_alert(&material(0.0, 5.0)).unwrap();
        assert_eq!(alert.priority.as_deref(), Some(PRIORITY_HIGH));
    }

    #[test]
    fn test_stock_levels() {
        assert_eq!(material(0.0, 5.0).stock_level(), StockLevel::Critical);
        assert_eq!(material(3.0, 5.0).stock_level(), StockLevel::Low);
        assert_eq!(material(5.0, 5.0).stock_level(), StockLevel::Ok);
    }

    #[tokio::test]
    async fn test_out_larger_than_stock_is_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![material(3.0, 1.0)]])
            .into_connection();
        let req = CreateMovement {
            material_id: 5,
            quantity: 4.0,
            transaction_type: TYPE_OUT.into(),
            reference_type: None,
            reference_id: None,
            lot_number: None,
            expiration_date: None,
            notes: None,
        };
        let result = record_movement(&db, Some(1), req).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_out_below_minimum_raises_alert() {
        let before = material(10.0, 5.0);
        let after = material(2.0, 5.0);
        let movement = inventory_movement::Model {
            id: 1,
            material_id: Some(5),
            quantity: 8.0,
            transaction_type: TYPE_OUT.into(),
            reference_type: None,
            reference_id: None,
            lot_number: None,
            expiration_date: None,
            notes: None,
            created_at: crate::db::now(),
            created_by: Some(1),
        };
        let alert = system_alert::Model {
            id: 9,
            message: "Estoque baixo".into(),
            priority: PRIORITY_MEDIUM.into(),
            status: "active".into(),
            module: MODULE.into(),
            reference_type: Some(ALERT_REFERENCE.into()),
            reference_id: Some(5),
            created_at: crate::db::now(),
            created_by: Some(1),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![before]])
            .append_query_results([vec![movement]])
            .append_query_results([vec![after]])
            .append_query_results([Vec::<system_alert::Model>::new()])
            .append_query_results([vec![alert]])
            .into_connection();
        let req = CreateMovement {
            material_id: 5,
            quantity: 8.0,
            transaction_type: TYPE_OUT.into(),
            reference_type: None,
            reference_id: None,
            lot_number: None,
            expiration_date: None,
            notes: None,
        };
        let result = record_movement(&db, Some(1), req).await.unwrap();
        assert_eq!(result.material.material.current_stock, 2.0);
        assert_eq!(result.material.stock_level, StockLevel::Low);
        assert_eq!(result.alert.map(|a| a.id), Some(9));
    }
}
