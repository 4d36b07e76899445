use axum::{extract::Path, http::StatusCode, Extension, Json};
use chrono::NaiveDate;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::Deserialize;

use crate::entity::quality_inspection::{self, RESULTS, TYPES};
use crate::entity::system_audit_log::AuditAction;
use crate::error::AppResult;
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;

use super::{apply_patch, apply_patch_nullable, delete_or_404, find_or_404, require_one_of, require_text, Created};

const MODULE: &str = perm::QUALITY;
const RESOURCE: &str = "Inspeção";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInspection {
    pub inspection_type: String,
    pub reference_type: String,
    pub reference_id: i32,
    pub result: Option<String>,
    pub notes: Option<String>,
    pub inspection_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInspection {
    pub inspection_type: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub result: Option<String>,
    pub notes: Option<String>,
    pub inspection_date: Option<NaiveDate>,
}

/// GET /api/quality-inspections
pub async fn list_inspections(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<quality_inspection::Model>>> {
    let rows = quality_inspection::Entity::find()
        .order_by_desc(quality_inspection::Column::InspectionDate)
        .order_by_desc(quality_inspection::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

pub async fn get_inspection(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<quality_inspection::Model>> {
    Ok(Json(find_or_404::<quality_inspection::Entity, _>(&*db, id, RESOURCE).await?))
}

pub async fn create_inspection(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateInspection>,
) -> AppResult<Created<quality_inspection::Model>> {
    require_one_of("inspectionType", &req.inspection_type, &TYPES)?;
    require_text("referenceType", &req.reference_type, "Tipo de referência é obrigatório")?;
    let result = req.result.unwrap_or_else(|| "pending".to_string());
    require_one_of("result", &result, &RESULTS)?;

    let created = quality_inspection::ActiveModel {
        inspection_type: Set(req.inspection_type),
        reference_type: Set(req.reference_type),
        reference_id: Set(req.reference_id),
        result: Set(result),
        notes: Set(req.notes),
        inspection_date: Set(req.inspection_date.unwrap_or_else(crate::db::today)),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "quality_inspections", created.id, None);
    Ok(Created(created))
}

pub async fn update_inspection(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateInspection>,
) -> AppResult<Json<quality_inspection::Model>> {
    if let Some(kind) = &req.inspection_type {
        require_one_of("inspectionType", kind, &TYPES)?;
    }
    if let Some(result) = &req.result {
        require_one_of("result", result, &RESULTS)?;
    }

    let mut model: quality_inspection::ActiveModel =
        find_or_404::<quality_inspection::Entity, _>(&*db, id, RESOURCE).await?.into();
    apply_patch!(model, req; inspection_type, reference_type, reference_id, result, inspection_date);
    apply_patch_nullable!(model, req; notes);
    let updated = model.update(&*db).await?;

    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "quality_inspections",
        id,
        Some(serde_json::json!({"result": updated.result})),
    );
    Ok(Json(updated))
}

pub async fn delete_inspection(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<quality_inspection::Entity, _>(&*db, id, RESOURCE).await?;
    record(&current_user, AuditAction::Delete, MODULE, "quality_inspections", id, None);
    Ok(status)
}
