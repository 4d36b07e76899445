//! Support ticket handlers
//!
//! Every authenticated user opens tickets and sees their own. Holders of the
//! `support` flag see all tickets, assign them and move them through the
//! status workflow.

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;

use crate::entity::support_ticket::{self, is_terminal, PRIORITIES, PRIORITY_NORMAL, STATUSES, STATUS_OPEN};
use crate::entity::system_audit_log::AuditAction;
use crate::error::{AppError, AppResult};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;

use super::{find_or_404, require_one_of, require_text, Created};

const MODULE: &str = perm::SUPPORT;
const RESOURCE: &str = "Chamado";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketFilter {
    pub status: Option<String>,
    pub assigned_to: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicket {
    pub title: String,
    pub description: String,
    pub priority: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<i32>,
    pub resolution: Option<String>,
}

impl UpdateTicket {
    /// Fields only support staff may change
    fn touches_workflow(&self) -> bool {
        self.status.is_some() || self.assigned_to.is_some() || self.resolution.is_some()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTicket {
    pub assigned_to: Option<i32>,
}

fn can_view(user: &CurrentUser, ticket: &support_ticket::Model) -> bool {
    ticket.user_id == user.id || user.has_permission(perm::SUPPORT)
}

/// Apply a status change, stamping or clearing `closed_at`
pub fn apply_status(model: &mut support_ticket::ActiveModel, current: &str, status: &str) {
    model.status = Set(status.to_string());
    match (is_terminal(current), is_terminal(status)) {
        (false, true) => model.closed_at = Set(Some(crate::db::now())),
        (true, false) => model.closed_at = Set(None),
        _ => {}
    }
}

/// GET /api/support/tickets
pub async fn list_tickets(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Query(filter): Query<TicketFilter>,
) -> AppResult<Json<Vec<support_ticket::Model>>> {
    let mut query = support_ticket::Entity::find();
    if !current_user.has_permission(perm::SUPPORT) {
        query = query.filter(support_ticket::Column::UserId.eq(current_user.id));
    }
    if let Some(status) = filter.status.filter(|s| !s.is_empty()) {
        query = query.filter(support_ticket::Column::Status.eq(status));
    }
    if let Some(assignee) = filter.assigned_to {
        query = query.filter(support_ticket::Column::AssignedTo.eq(assignee));
    }
    let rows = query
        .order_by_desc(support_ticket::Column::CreatedAt)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/support/tickets/:id
pub async fn get_ticket(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<support_ticket::Model>> {
    let ticket = find_or_404::<support_ticket::Entity, _>(&*db, id, RESOURCE).await?;
    if !can_view(&current_user, &ticket) {
        return Err(AppError::forbidden());
    }
    Ok(Json(ticket))
}

/// POST /api/support/tickets
pub async fn create_ticket(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateTicket>,
) -> AppResult<Created<support_ticket::Model>> {
    require_text("title", &req.title, "Título é obrigatório")?;
    require_text("description", &req.description, "Descrição é obrigatória")?;
    let priority = req.priority.unwrap_or_else(|| PRIORITY_NORMAL.to_string());
    require_one_of("priority", &priority, &PRIORITIES)?;

    let now = crate::db::now();
    let created = support_ticket::ActiveModel {
        created_at: Set(now),
        updated_at: Set(now),
        title: Set(req.title),
        description: Set(req.description),
        status: Set(STATUS_OPEN.to_string()),
        priority: Set(priority),
        user_id: Set(current_user.id),
        assigned_to: Set(None),
        category: Set(req.category.unwrap_or_else(|| "outro".to_string())),
        resolution: Set(None),
        closed_at: Set(None),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    tracing::info!("Support ticket {} opened by {}", created.id, current_user.username);
    record(&current_user, AuditAction::Create, MODULE, "support_tickets", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/support/tickets/:id
pub async fn update_ticket(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateTicket>,
) -> AppResult<Json<support_ticket::Model>> {
    let ticket = find_or_404::<support_ticket::Entity, _>(&*db, id, RESOURCE).await?;
    if !can_view(&current_user, &ticket) {
        return Err(AppError::forbidden());
    }
    if req.touches_workflow() {
        current_user.require(perm::SUPPORT)?;
    }
    if let Some(status) = &req.status {
        require_one_of("status", status, &STATUSES)?;
    }
    if let Some(priority) = &req.priority {
        require_one_of("priority", priority, &PRIORITIES)?;
    }

    let current_status = ticket.status.clone();
    let mut model: support_ticket::ActiveModel = ticket.into();
    if let Some(title) = req.title {
        model.title = Set(title);
    }
    if let Some(description) = req.description {
        model.description = Set(description);
    }
    if let Some(priority) = req.priority {
        model.priority = Set(priority);
    }
    if let Some(category) = req.category {
        model.category = Set(category);
    }
    if let Some(assignee) = req.assigned_to {
        model.assigned_to = Set(Some(assignee));
    }
    if let Some(resolution) = req.resolution {
        model.resolution = Set(Some(resolution));
    }
    if let Some(status) = &req.status {
        apply_status(&mut model, &current_status, status);
    }
    model.updated_at = Set(crate::db::now());
    let updated = model.update(&*db).await?;

    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "support_tickets",
        id,
        Some(serde_json::json!({"status": updated.status})),
    );
    Ok(Json(updated))
}

/// POST /api/support/tickets/:id/assign
pub async fn assign_ticket(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<AssignTicket>,
) -> AppResult<Json<support_ticket::Model>> {
    current_user.require(perm::SUPPORT)?;
    let ticket = find_or_404::<support_ticket::Entity, _>(&*db, id, RESOURCE).await?;

    let assignee = req.assigned_to.unwrap_or(current_user.id);
    let current_status = ticket.status.clone();
    let mut model: support_ticket::ActiveModel = ticket.into();
    model.assigned_to = Set(Some(assignee));
    if current_status == STATUS_OPEN {
        apply_status(&mut model, &current_status, support_ticket::STATUS_IN_PROGRESS);
    }
    model.updated_at = Set(crate::db::now());
    let updated = model.update(&*db).await?;

    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "support_tickets",
        id,
        Some(serde_json::json!({"assignedTo": assignee})),
    );
    Ok(Json(updated))
}

/// DELETE /api/support/tickets/:id
pub async fn delete_ticket(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    current_user.require(perm::SUPPORT)?;
    let result = support_ticket::Entity::delete_by_id(id).exec(&*db).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound(RESOURCE.to_string()));
    }
    record(&current_user, AuditAction::Delete, MODULE, "support_tickets", id, None);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::support_ticket::{STATUS_CLOSED, STATUS_IN_PROGRESS, STATUS_RESOLVED};
    use sea_orm::ActiveValue;

    fn blank() -> support_ticket::ActiveModel {
        support_ticket::ActiveModel::default()
    }

    #[test]
    fn test_resolving_sets_closed_at() {
        let mut model = blank();
        apply_status(&mut model, STATUS_IN_PROGRESS, STATUS_RESOLVED);
        assert!(matches!(model.closed_at, ActiveValue::Set(Some(_))));
    }

    #[test]
    fn test_reopening_clears_closed_at() {
        let mut model = blank();
        apply_status(&mut model, STATUS_CLOSED, STATUS_OPEN);
        assert!(matches!(model.closed_at, ActiveValue::Set(None)));
    }

    #[test]
    fn test_moving_between_terminal_states_keeps_closed_at() {
        let mut model = blank();
        apply_status(&mut model, STATUS_RESOLVED, STATUS_CLOSED);
        assert!(matches!(model.closed_at, ActiveValue::NotSet));
        assert!(matches!(&model.status, ActiveValue::Set(s) if s == STATUS_CLOSED));
    }

    #[test]
    fn test_workflow_fields() {
        let req = UpdateTicket {
            title: Some("x".into()),
            description: None,
            priority: None,
            category: None,
            status: None,
            assigned_to: None,
            resolution: None,
        };
        assert!(!req.touches_workflow());
        let req = UpdateTicket {
            status: Some(STATUS_CLOSED.into()),
            ..req
        };
        assert!(req.touches_workflow());
    }
}
