//! Audit log handlers
//!
//! Query endpoint for the system audit trail plus the background writer that
//! mutating handlers feed.

use axum::{extract::Query, response::Json, Extension};
use chrono::NaiveDate;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Select};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entity::{system_audit_log, user};
use crate::error::AppResult;
use crate::middleware::{CurrentUser, DbConn};
use crate::pagination::{paginate_query, PageParams, PageQuery, Paginated, SortOrder};
use crate::permission::perm;

use super::ilike_any;

/// Default page size for the audit listing
const AUDIT_PAGE_SIZE: u64 = 50;

/// Filters for the audit listing
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub module: Option<String>,
    pub entity_type: Option<String>,
    pub action: Option<String>,
    pub user_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub search: Option<String>,
}

/// Audit row with the acting user's name
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogView {
    #[serde(flatten)]
    pub log: system_audit_log::Model,
    pub username: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Build the filtered, sorted select
pub fn build_query(filter: &AuditFilter, params: &PageParams) -> Select<system_audit_log::Entity> {
    use system_audit_log::Column;

    let mut query = system_audit_log::Entity::find();

    if let Some(module) = non_empty(&filter.module) {
        query = query.filter(Column::Module.eq(module));
    }
    if let Some(entity_type) = non_empty(&filter.entity_type) {
        query = query.filter(Column::EntityType.eq(entity_type));
    }
    if let Some(action) = non_empty(&filter.action) {
        query = query.filter(Column::Action.eq(action));
    }
    if let Some(user_id) = filter.user_id {
        query = query.filter(Column::UserId.eq(user_id));
    }
    if let Some(start) = filter.start_date.and_then(|d| d.and_hms_opt(0, 0, 0)) {
        query = query.filter(Column::Timestamp.gte(start));
    }
    if let Some(end) = filter.end_date.and_then(|d| d.and_hms_opt(23, 59, 59)) {
        query = query.filter(Column::Timestamp.lte(end));
    }
    if let Some(term) = non_empty(&filter.search) {
        query = query.filter(ilike_any(
            &[Column::EntityType, Column::Module, Column::Action],
            term,
        ));
    }

    let column = match params.sort_by.as_deref() {
        Some("action") => Column::Action,
        Some("module") => Column::Module,
        Some("entityType") => Column::EntityType,
        Some("userId") => Column::UserId,
        Some("id") => Column::Id,
        _ => Column::Timestamp,
    };
    // Newest first unless asked otherwise
    match (params.sort_by.is_some(), params.sort_order) {
        (true, SortOrder::Asc) => query.order_by_asc(column),
        _ => query.order_by_desc(column),
    }
}

/// GET /api/system-audit-logs
pub async fn list_audit_logs(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Query(filter): Query<AuditFilter>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Paginated<AuditLogView>>> {
    current_user.require(perm::ADMIN)?;

    let params = PageParams::from_query(page, AUDIT_PAGE_SIZE);
    let result = paginate_query(&*db, build_query(&filter, &params), &params).await?;

    let user_ids: Vec<i32> = result.data.iter().filter_map(|l| l.user_id).collect();
    let names: HashMap<i32, String> = if user_ids.is_empty() {
        HashMap::new()
    } else {
        user::Entity::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(&*db)
            .await?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect()
    };

    Ok(Json(result.map(|log| AuditLogView {
        username: log.user_id.and_then(|id| names.get(&id).cloned()),
        log,
    })))
}

/// Service for adding audit entries
pub mod service {
    use sea_orm::{ActiveModelTrait, Set};
    use tokio::sync::mpsc;

    use crate::entity::system_audit_log::{self, AuditAction};
    use crate::middleware::CurrentUser;

    /// Entry to be written
    #[derive(Debug, Clone)]
    pub struct AuditEntry {
        pub user_id: Option<i32>,
        pub action: AuditAction,
        pub entity_type: String,
        pub entity_id: Option<i32>,
        pub details: Option<serde_json::Value>,
        pub module: Option<String>,
        pub ip: Option<String>,
        pub user_agent: Option<String>,
    }

    /// Global audit channel
    static AUDIT_TX: std::sync::OnceLock<mpsc::Sender<AuditEntry>> = std::sync::OnceLock::new();

    /// Initialize the audit service. Calling it again is a no-op.
    pub fn init(db: sea_orm::DatabaseConnection) {
        if AUDIT_TX.get().is_some() {
            tracing::debug!("Audit service already initialized, skipping");
            return;
        }

        let (tx, mut rx) = mpsc::channel::<AuditEntry>(200);
        if AUDIT_TX.set(tx).is_err() {
            tracing::debug!("Audit service initialized by another thread");
            return;
        }

        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let log = system_audit_log::ActiveModel {
                    user_id: Set(entry.user_id),
                    action: Set(entry.action.as_str().to_string()),
                    entity_type: Set(entry.entity_type),
                    entity_id: Set(entry.entity_id),
                    details: Set(entry.details),
                    ip_address: Set(entry.ip),
                    user_agent: Set(entry.user_agent),
                    timestamp: Set(crate::db::now()),
                    module: Set(entry.module),
                    ..Default::default()
                };

                if let Err(e) = log.insert(&db).await {
                    tracing::error!("Failed to write audit entry: {}", e);
                }
            }
        });
    }

    /// Queue an entry without blocking the request
    pub fn add_entry(entry: AuditEntry) {
        if let Some(tx) = AUDIT_TX.get() {
            if tx.try_send(entry).is_err() {
                tracing::warn!("Audit channel is full, entry dropped");
            }
        } else {
            tracing::debug!(
                "Audit service not initialized, entry dropped: {} {}",
                entry.action.as_str(),
                entry.entity_type
            );
        }
    }

    /// Build an entry from the acting user
    pub fn entry(
        user: &CurrentUser,
        action: AuditAction,
        module: &str,
        entity_type: &str,
        entity_id: Option<i32>,
        details: Option<serde_json::Value>,
    ) -> AuditEntry {
        AuditEntry {
            user_id: Some(user.id),
            action,
            entity_type: entity_type.to_string(),
            entity_id,
            details,
            module: Some(module.to_string()),
            ip: user.ip.clone(),
            user_agent: user.user_agent.clone(),
        }
    }

    /// Record a mutation performed by `user`
    pub fn record(
        user: &CurrentUser,
        action: AuditAction,
        module: &str,
        entity_type: &str,
        entity_id: i32,
        details: Option<serde_json::Value>,
    ) {
        add_entry(entry(user, action, module, entity_type, Some(entity_id), details));
    }
}

#[cfg(test)]
mod tests {
    use super::service::entry;
    use super::*;
    use crate::entity::system_audit_log::AuditAction;
    use crate::permission::Permissions;
    use sea_orm::{DatabaseBackend, QueryTrait};

    #[test]
    fn test_default_sort_is_newest_first() {
        let params = PageParams::from_query(PageQuery::default(), AUDIT_PAGE_SIZE);
        assert_eq!(params.page_size, 50);
        let sql = build_query(&AuditFilter::default(), &params)
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.ends_with(r#"ORDER BY "system_audit_logs"."timestamp" DESC"#));
    }

    #[test]
    fn test_filters_applied() {
        let filter = AuditFilter {
            module: Some("inventory".into()),
            action: Some("delete".into()),
            user_id: Some(3),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        let sql = build_query(&filter, &PageParams::default())
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""module" = 'inventory'"#));
        assert!(sql.contains(r#""action" = 'delete'"#));
        assert!(sql.contains(r#""user_id" = 3"#));
        assert!(sql.contains(r#""timestamp" >= '2024-01-01 00:00:00'"#));
    }

    #[test]
    fn test_entry_carries_request_meta() {
        let user = CurrentUser {
            id: 7,
            username: "joao".into(),
            full_name: "João".into(),
            role: "user".into(),
            permissions: Permissions::none(),
            ip: Some("10.1.1.1".into()),
            user_agent: Some("curl".into()),
        };
        let e = entry(&user, AuditAction::Update, "finance", "accounts", Some(4), None);
        assert_eq!(e.user_id, Some(7));
        assert_eq!(e.module.as_deref(), Some("finance"));
        assert_eq!(e.ip.as_deref(), Some("10.1.1.1"));
        assert_eq!(e.action.as_str(), "update");
    }
}
