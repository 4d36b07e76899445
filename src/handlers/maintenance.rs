//! Maintenance handlers: equipment and maintenance orders

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::Deserialize;

use crate::entity::maintenance_order::{STATUS_COMPLETED, STATUS_OPEN};
use crate::entity::system_audit_log::AuditAction;
use crate::entity::{equipment, maintenance_order};
use crate::error::AppResult;
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::AppState;

use super::{
    apply_patch, apply_patch_nullable, delete_or_404, find_or_404, require_one_of, require_text,
    Created,
};

const MODULE: &str = perm::MAINTENANCE;
const URGENCIES: [&str; 3] = ["high", "medium", "low"];
const ORDER_TYPES: [&str; 2] = ["preventive", "corrective"];
const ORDER_STATUSES: [&str; 3] = [STATUS_OPEN, "in-progress", STATUS_COMPLETED];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEquipment {
    pub name: String,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub sector: String,
    #[serde(rename = "type")]
    pub equipment_type: String,
    pub criticality: String,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEquipment {
    pub name: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub sector: Option<String>,
    #[serde(rename = "type")]
    pub equipment_type: Option<String>,
    pub criticality: Option<String>,
    pub status: Option<String>,
}

/// GET /api/equipment
pub async fn list_equipment(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<equipment::Model>>> {
    let rows = equipment::Entity::find()
        .order_by_asc(equipment::Column::Name)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/equipment/:id
pub async fn get_equipment(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<equipment::Model>> {
    Ok(Json(find_or_404::<equipment::Entity, _>(&*db, id, "Equipamento").await?))
}

/// POST /api/equipment
pub async fn create_equipment(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateEquipment>,
) -> AppResult<Created<equipment::Model>> {
    require_text("name", &req.name, "Nome é obrigatório")?;
    require_text("sector", &req.sector, "Setor é obrigatório")?;
    require_one_of("criticality", &req.criticality, &equipment::CRITICALITIES)?;
    let status = req.status.unwrap_or_else(|| "operational".to_string());
    require_one_of("status", &status, &equipment::STATUSES)?;

    let created = equipment::ActiveModel {
        name: Set(req.name),
        model: Set(req.model),
        serial_number: Set(req.serial_number),
        manufacturer: Set(req.manufacturer),
        purchase_date: Set(req.purchase_date),
        sector: Set(req.sector),
        equipment_type: Set(req.equipment_type),
        criticality: Set(req.criticality),
        status: Set(status),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "equipment", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/equipment/:id
pub async fn update_equipment(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateEquipment>,
) -> AppResult<Json<equipment::Model>> {
    if let Some(criticality) = &req.criticality {
        require_one_of("criticality", criticality, &equipment::CRITICALITIES)?;
    }
    if let Some(status) = &req.status {
        require_one_of("status", status, &equipment::STATUSES)?;
    }

    let mut model: equipment::ActiveModel =
        find_or_404::<equipment::Entity, _>(&*db, id, "Equipamento").await?.into();
    apply_patch!(model, req; name, sector, equipment_type, criticality, status);
    apply_patch_nullable!(model, req; model, serial_number, manufacturer, purchase_date);
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "equipment", id, None);
    Ok(Json(updated))
}

/// DELETE /api/equipment/:id
pub async fn delete_equipment(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<equipment::Entity, _>(&*db, id, "Equipamento").await?;
    record(&current_user, AuditAction::Delete, MODULE, "equipment", id, None);
    Ok(status)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMaintenanceOrder {
    pub order_number: String,
    pub equipment_id: Option<i32>,
    #[serde(rename = "type")]
    pub order_type: String,
    pub description: String,
    pub urgency: String,
    pub status: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMaintenanceOrder {
    pub order_number: Option<String>,
    pub equipment_id: Option<i32>,
    #[serde(rename = "type")]
    pub order_type: Option<String>,
    pub description: Option<String>,
    pub urgency: Option<String>,
    pub status: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// GET /api/maintenance-orders
pub async fn list_maintenance_orders(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<maintenance_order::Model>>> {
    let rows = maintenance_order::Entity::find()
        .order_by_desc(maintenance_order::Column::CreatedAt)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/maintenance-orders/:id
pub async fn get_maintenance_order(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<maintenance_order::Model>> {
    Ok(Json(
        find_or_404::<maintenance_order::Entity, _>(&*db, id, "Ordem de manutenção").await?,
    ))
}

/// POST /api/maintenance-orders
pub async fn create_maintenance_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateMaintenanceOrder>,
) -> AppResult<Created<maintenance_order::Model>> {
    require_text("orderNumber", &req.order_number, "Número da ordem é obrigatório")?;
    require_text("description", &req.description, "Descrição é obrigatória")?;
    require_one_of("type", &req.order_type, &ORDER_TYPES)?;
    require_one_of("urgency", &req.urgency, &URGENCIES)?;
    let status = req.status.unwrap_or_else(|| STATUS_OPEN.to_string());
    require_one_of("status", &status, &ORDER_STATUSES)?;

    let created = maintenance_order::ActiveModel {
        order_number: Set(req.order_number),
        equipment_id: Set(req.equipment_id),
        order_type: Set(req.order_type),
        description: Set(req.description),
        urgency: Set(req.urgency),
        status: Set(status),
        scheduled_date: Set(req.scheduled_date),
        completion_date: Set(None),
        notes: Set(req.notes),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "maintenance_orders", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/maintenance-orders/:id
pub async fn update_maintenance_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateMaintenanceOrder>,
) -> AppResult<Json<maintenance_order::Model>> {
    if let Some(status) = &req.status {
        require_one_of("status", status, &ORDER_STATUSES)?;
    }
    if let Some(urgency) = &req.urgency {
        require_one_of("urgency", urgency, &URGENCIES)?;
    }

    let mut model: maintenance_order::ActiveModel =
        find_or_404::<maintenance_order::Entity, _>(&*db, id, "Ordem de manutenção")
            .await?
            .into();
    apply_patch!(model, req; order_number, order_type, description, urgency, status);
    apply_patch_nullable!(model, req; equipment_id, scheduled_date, completion_date, notes);
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "maintenance_orders", id, None);
    Ok(Json(updated))
}

/// POST /api/maintenance-orders/:id/complete
pub async fn complete_maintenance_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<maintenance_order::Model>> {
    let mut model: maintenance_order::ActiveModel =
        find_or_404::<maintenance_order::Entity, _>(&*db, id, "Ordem de manutenção")
            .await?
            .into();
    model.status = Set(STATUS_COMPLETED.to_string());
    model.completion_date = Set(Some(crate::db::today()));
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "maintenance_orders",
        id,
        Some(serde_json::json!({"status": STATUS_COMPLETED})),
    );
    Ok(Json(updated))
}

/// DELETE /api/maintenance-orders/:id
pub async fn delete_maintenance_order(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status =
        delete_or_404::<maintenance_order::Entity, _>(&*db, id, "Ordem de manutenção").await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "maintenance_orders", id, None);
    Ok(status)
}
