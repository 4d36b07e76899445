//! System alert handlers
//!
//! Alerts move `active -> acknowledged -> resolved`. New alerts are pushed to
//! every connected WebSocket client.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::Deserialize;

use crate::entity::system_alert::{
    self, PRIORITY_MEDIUM, STATUS_ACKNOWLEDGED, STATUS_ACTIVE, STATUS_RESOLVED,
};
use crate::entity::system_audit_log::AuditAction;
use crate::error::{AppError, AppResult};
use crate::handlers::audit::service::{add_entry, entry, record, AuditEntry};
use crate::middleware::{CurrentUser, DbConn};
use crate::state::AppState;
use crate::ws::{WsMessage, HUB};

use super::{delete_or_404, find_or_404, require_one_of, require_text, Created};

const RESOURCE: &str = "Alerta";
const TABLE: &str = "system_alerts";
const PRIORITIES: [&str; 3] = ["high", "medium", "low"];

/// Alert to be raised
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub message: String,
    pub priority: Option<String>,
    pub module: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertFilter {
    pub module: Option<String>,
    pub status: Option<String>,
}

/// Insert an active alert
pub async fn raise_alert<C: ConnectionTrait>(
    db: &C,
    alert: NewAlert,
    created_by: Option<i32>,
) -> Result<system_alert::Model, DbErr> {
    system_alert::ActiveModel {
        message: Set(alert.message),
        priority: Set(alert.priority.unwrap_or_else(|| PRIORITY_MEDIUM.to_string())),
        status: Set(STATUS_ACTIVE.to_string()),
        module: Set(alert.module),
        reference_type: Set(alert.reference_type),
        reference_id: Set(alert.reference_id),
        created_at: Set(crate::db::now()),
        created_by: Set(created_by),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Whether an unresolved alert already points at this record
pub async fn has_open_alert<C: ConnectionTrait>(
    db: &C,
    module: &str,
    reference_type: &str,
    reference_id: i32,
) -> Result<bool, DbErr> {
    let existing = system_alert::Entity::find()
        .filter(system_alert::Column::Module.eq(module))
        .filter(system_alert::Column::ReferenceType.eq(reference_type))
        .filter(system_alert::Column::ReferenceId.eq(reference_id))
        .filter(system_alert::Column::Status.eq(STATUS_ACTIVE))
        .one(db)
        .await?;
    Ok(existing.is_some())
}

/// Push a new alert to connected clients
pub fn publish(alert: &system_alert::Model) {
    match serde_json::to_value(alert) {
        Ok(value) => HUB.broadcast(WsMessage::AlertCreated(value)),
        Err(e) => tracing::warn!("Failed to serialize alert {}: {}", alert.id, e),
    }
}

/// Next status for an acknowledge or resolve request
pub fn transition(current: &str, target: &str) -> AppResult<()> {
    match (current, target) {
        (STATUS_RESOLVED, STATUS_RESOLVED) => {
            Err(AppError::BadRequest("Alerta já resolvido".to_string()))
        }
        (STATUS_RESOLVED, STATUS_ACKNOWLEDGED) => Err(AppError::BadRequest(
            "Alerta resolvido não pode ser reconhecido".to_string(),
        )),
        (STATUS_ACKNOWLEDGED, STATUS_ACKNOWLEDGED) => {
            Err(AppError::BadRequest("Alerta já reconhecido".to_string()))
        }
        _ => Ok(()),
    }
}

/// GET /api/alerts
pub async fn list_alerts(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<AlertFilter>,
) -> AppResult<Json<Vec<system_alert::Model>>> {
    let mut query = system_alert::Entity::find();
    if let Some(module) = filter.module.filter(|m| !m.is_empty()) {
        query = query.filter(system_alert::Column::Module.eq(module));
    }
    if let Some(status) = filter.status.filter(|s| !s.is_empty()) {
        query = query.filter(system_alert::Column::Status.eq(status));
    }
    let alerts = query
        .order_by_desc(system_alert::Column::CreatedAt)
        .all(&*db)
        .await?;
    Ok(Json(alerts))
}

/// GET /api/alerts/active
pub async fn list_active_alerts(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<system_alert::Model>>> {
    let alerts = system_alert::Entity::find()
        .filter(system_alert::Column::Status.eq(STATUS_ACTIVE))
        .order_by_desc(system_alert::Column::CreatedAt)
        .all(&*db)
        .await?;
    Ok(Json(alerts))
}

/// POST /api/alerts
pub async fn create_alert(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<NewAlert>,
) -> AppResult<Created<system_alert::Model>> {
    require_text("message", &req.message, "Mensagem é obrigatória")?;
    require_text("module", &req.module, "Módulo é obrigatório")?;
    if let Some(priority) = &req.priority {
        require_one_of("priority", priority, &PRIORITIES)?;
    }

    let alert = raise_alert(&*db, req, Some(current_user.id)).await?;
    publish(&alert);
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, &alert.module, TABLE, alert.id, None);
    Ok(Created(alert))
}

/// Audit entry for an acknowledge or resolve
pub fn status_entry(user: &CurrentUser, alert: &system_alert::Model) -> AuditEntry {
    entry(
        user,
        AuditAction::Update,
        &alert.module,
        TABLE,
        Some(alert.id),
        Some(serde_json::json!({ "status": alert.status })),
    )
}

async fn change_status(
    state: &AppState,
    db: &DbConn,
    user: &CurrentUser,
    id: i32,
    target: &str,
) -> AppResult<system_alert::Model> {
    let alert = find_or_404::<system_alert::Entity, _>(&**db, id, RESOURCE).await?;
    transition(&alert.status, target)?;

    let now = crate::db::now();
    let mut model: system_alert::ActiveModel = alert.into();
    model.status = Set(target.to_string());
    if target == STATUS_RESOLVED {
        model.resolved_at = Set(Some(now));
        model.resolved_by = Set(Some(user.id));
    } else {
        model.acknowledged_at = Set(Some(now));
        model.acknowledged_by = Set(Some(user.id));
    }
    let updated = model.update(&**db).await?;

    state.invalidate_dashboard();
    add_entry(status_entry(user, &updated));
    Ok(updated)
}

/// POST /api/alerts/:id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<system_alert::Model>> {
    let alert = change_status(&state, &db, &current_user, id, STATUS_ACKNOWLEDGED).await?;
    Ok(Json(alert))
}

/// POST /api/alerts/:id/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<system_alert::Model>> {
    let alert = change_status(&state, &db, &current_user, id, STATUS_RESOLVED).await?;
    Ok(Json(alert))
}

/// DELETE /api/alerts/:id
pub async fn delete_alert(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    current_user.require_admin()?;
    let alert = find_or_404::<system_alert::Entity, _>(&*db, id, RESOURCE).await?;
    let status = delete_or_404::<system_alert::Entity, _>(&*db, id, RESOURCE).await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, &alert.module, TABLE, id, None);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permissions;
    use crate::state::DASHBOARD_KEY;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn operator() -> CurrentUser {
        CurrentUser {
            id: 9,
            username: "operador".into(),
            full_name: "Operador".into(),
            role: "user".into(),
            permissions: Permissions::none(),
            ip: Some("10.0.0.9".into()),
            user_agent: None,
        }
    }

    fn alert(status: &str) -> system_alert::Model {
        system_alert::Model {
            id: 4,
            message: "Estoque baixo: Aço".into(),
            priority: "medium".into(),
            status: status.into(),
            module: "inventory".into(),
            reference_type: Some("raw_material".into()),
            reference_id: Some(2),
            created_at: crate::db::now(),
            created_by: None,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[tokio::test]
    async fn test_acknowledge_invalidates_dashboard() {
        let mut acknowledged = alert(STATUS_ACKNOWLEDGED);
        acknowledged.acknowledged_by = Some(9);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![alert(STATUS_ACTIVE)]])
            .append_query_results([vec![acknowledged.clone()]])
            .into_connection();
        let state = AppState::new(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            crate::Config::default(),
        );
        state.dashboard_cache.set(DASHBOARD_KEY, serde_json::json!({"activeAlerts": 1}));

        let Json(updated) = acknowledge_alert(
            State(state.clone()),
            Extension(DbConn(db)),
            Extension(operator()),
            Path(4),
        )
        .await
        .unwrap();

        assert_eq!(updated, acknowledged);
        assert!(state.dashboard_cache.is_empty());
    }

    #[test]
    fn test_status_change_is_audited() {
        let e = status_entry(&operator(), &alert(STATUS_RESOLVED));
        assert_eq!(e.action.as_str(), "update");
        assert_eq!(e.entity_type, TABLE);
        assert_eq!(e.entity_id, Some(4));
        assert_eq!(e.module.as_deref(), Some("inventory"));
        assert_eq!(e.details, Some(serde_json::json!({"status": "resolved"})));
        assert_eq!(e.ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(transition(STATUS_ACTIVE, STATUS_ACKNOWLEDGED).is_ok());
        assert!(transition(STATUS_ACTIVE, STATUS_RESOLVED).is_ok());
        assert!(transition(STATUS_ACKNOWLEDGED, STATUS_RESOLVED).is_ok());
        assert!(transition(STATUS_ACKNOWLEDGED, STATUS_ACKNOWLEDGED).is_err());
        assert!(transition(STATUS_RESOLVED, STATUS_ACKNOWLEDGED).is_err());

        let err = transition(STATUS_RESOLVED, STATUS_RESOLVED).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
