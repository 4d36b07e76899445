//! Dashboard handlers
//!
//! Aggregates are computed from the module tables and kept in the TTL cache
//! until a write in one of the summarized modules invalidates them.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{Datelike, NaiveDate};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use serde_json::Value;

use crate::entity::account::{self, STATUS_PENDING, TYPE_PAYABLE, TYPE_RECEIVABLE};
use crate::entity::maintenance_order::{self, STATUS_COMPLETED};
use crate::entity::raw_material::{self, StockLevel};
use crate::entity::{
    department, employee, expense, inventory_movement, production_loss, production_order,
    system_alert,
};
use crate::error::{AppError, AppResult};
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::{AppState, DASHBOARD_KEY};

const RECENT: usize = 3;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductionSummary {
    pub count: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub planned: usize,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    pub open_count: usize,
    pub urgent_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub low_stock_count: usize,
    pub low_stock_items: Vec<raw_material::Model>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub receivable_total: f64,
    pub upcoming_payments: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub production: ProductionSummary,
    pub maintenance: MaintenanceSummary,
    pub inventory: InventorySummary,
    pub financial: FinancialSummary,
    pub recent_orders: Vec<production_order::Model>,
    pub recent_maintenance_orders: Vec<maintenance_order::Model>,
    pub recent_accounts: Vec<account::Model>,
    pub active_alerts: u64,
}

/// Last `n` rows by id, newest first
fn most_recent<T, F: Fn(&T) -> i32>(rows: &[T], n: usize, id: F) -> Vec<T>
where
    T: Clone,
{
    let mut sorted: Vec<T> = rows.to_vec();
    sorted.sort_by_key(|r| std::cmp::Reverse(id(r)));
    sorted.truncate(n);
    sorted
}

pub fn summarize_production(orders: &[production_order::Model]) -> ProductionSummary {
    let with = |status: &str| orders.iter().filter(|o| o.status == status).count();
    ProductionSummary {
        count: orders.len(),
        in_progress: with("in-progress"),
        completed: with("completed"),
        planned: with("planned"),
    }
}

pub fn summarize_maintenance(orders: &[maintenance_order::Model]) -> MaintenanceSummary {
    let open: Vec<_> = orders.iter().filter(|o| o.status != STATUS_COMPLETED).collect();
    MaintenanceSummary {
        open_count: open.len(),
        urgent_count: open.iter().filter(|o| o.urgency == "high").count(),
    }
}

pub fn summarize_inventory(materials: &[raw_material::Model]) -> InventorySummary {
    let low: Vec<raw_material::Model> = materials
        .iter()
        .filter(|m| m.is_below_minimum())
        .cloned()
        .collect();
    InventorySummary {
        low_stock_count: low.len(),
        low_stock_items: low,
    }
}

pub fn summarize_finance(accounts: &[account::Model]) -> FinancialSummary {
    FinancialSummary {
        receivable_total: accounts
            .iter()
            .filter(|a| a.account_type == TYPE_RECEIVABLE)
            .map(|a| a.amount)
            .sum(),
        upcoming_payments: accounts
            .iter()
            .filter(|a| a.account_type == TYPE_PAYABLE && a.status == STATUS_PENDING)
            .count(),
    }
}

async fn build_dashboard(db: &DbConn) -> AppResult<DashboardData> {
    let production = production_order::Entity::find().all(&**db).await?;
    let maintenance = maintenance_order::Entity::find().all(&**db).await?;
    let materials = raw_material::Entity::find().all(&**db).await?;
    let accounts = account::Entity::find().all(&**db).await?;
    let active_alerts = system_alert::Entity::find()
        .filter(system_alert::Column::Status.eq(system_alert::STATUS_ACTIVE))
        .count(&**db)
        .await?;

    let today = crate::db::today();
    Ok(DashboardData {
        production: summarize_production(&production),
        maintenance: summarize_maintenance(&maintenance),
        inventory: summarize_inventory(&materials),
        financial: summarize_finance(&accounts),
        recent_orders: most_recent(&production, RECENT, |o| o.id),
        recent_maintenance_orders: most_recent(&maintenance, RECENT, |o| o.id),
        recent_accounts: most_recent(&accounts, RECENT, |a| a.id)
            .into_iter()
            .map(|a| a.with_effective_status(today))
            .collect(),
        active_alerts,
    })
}

/// Serve from the cache, computing and storing on a miss
///
/// A result computed across an invalidation is returned but not stored.
async fn cached<F, Fut, T>(state: &AppState, key: &str, compute: F) -> AppResult<Value>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = AppResult<T>>,
    T: Serialize,
{
    if let Some(hit) = state.dashboard_cache.get(key) {
        return Ok(hit);
    }
    let generation = state.dashboard_cache.generation();
    let value = serde_json::to_value(compute().await?)?;
    if !state
        .dashboard_cache
        .set_if_generation(key, value.clone(), generation)
    {
        tracing::debug!("Dashboard '{}' invalidated while computing, not cached", key);
    }
    Ok(value)
}

/// GET /api/dashboard
pub async fn get_dashboard(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Value>> {
    let value = cached(&state, DASHBOARD_KEY, || build_dashboard(&db)).await?;
    Ok(Json(value))
}

// ---------------------------------------------------------------------------
// Module KPIs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinanceKpis {
    pub receivable_pending: f64,
    pub payable_pending: f64,
    pub overdue_count: usize,
    pub overdue_amount: f64,
    pub expenses_this_month: f64,
}

pub fn finance_kpis(accounts: &[account::Model], expenses: &[expense::Model], today: NaiveDate) -> FinanceKpis {
    let pending = |kind: &str| -> f64 {
        accounts
            .iter()
            .filter(|a| a.account_type == kind && a.status == STATUS_PENDING)
            .map(|a| a.amount)
            .sum()
    };
    let overdue: Vec<&account::Model> = accounts
        .iter()
        .filter(|a| a.effective_status(today) == account::STATUS_OVERDUE)
        .collect();
    FinanceKpis {
        receivable_pending: pending(TYPE_RECEIVABLE),
        payable_pending: pending(TYPE_PAYABLE),
        overdue_count: overdue.len(),
        overdue_amount: overdue.iter().map(|a| a.amount).sum(),
        expenses_this_month: expenses
            .iter()
            .filter(|e| e.due_date.year() == today.year() && e.due_date.month() == today.month())
            .map(|e| e.amount)
            .sum(),
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryKpis {
    pub material_count: usize,
    pub critical_count: usize,
    pub low_count: usize,
    pub ok_count: usize,
    pub inbound_quantity: f64,
    pub outbound_quantity: f64,
}

pub fn inventory_kpis(materials: &[raw_material::Model], movements: &[inventory_movement::Model]) -> InventoryKpis {
    let level = |l: StockLevel| materials.iter().filter(|m| m.stock_level() == l).count();
    let moved = |kind: &str| -> f64 {
        movements
            .iter()
            .filter(|m| m.transaction_type == kind)
            .map(|m| m.quantity)
            .sum()
    };
    InventoryKpis {
        material_count: materials.len(),
        critical_count: level(StockLevel::Critical),
        low_count: level(StockLevel::Low),
        ok_count: level(StockLevel::Ok),
        inbound_quantity: moved(inventory_movement::TYPE_IN),
        outbound_quantity: moved(inventory_movement::TYPE_OUT),
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductionKpis {
    pub by_status: BTreeMap<String, usize>,
    pub planned_quantity: f64,
    pub completed_quantity: f64,
    pub loss_quantity: f64,
    /// Losses relative to completed quantity, in percent
    pub loss_rate: f64,
}

pub fn production_kpis(orders: &[production_order::Model], losses: &[production_loss::Model]) -> ProductionKpis {
    let mut by_status = BTreeMap::new();
    for order in orders {
        *by_status.entry(order.status.clone()).or_insert(0) += 1;
    }
    let quantity = |status: &str| -> f64 {
        orders
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.quantity)
            .sum()
    };
    let completed_quantity = quantity("completed");
    let loss_quantity: f64 = losses.iter().map(|l| l.quantity).sum();
    ProductionKpis {
        by_status,
        planned_quantity: orders.iter().map(|o| o.quantity).sum(),
        completed_quantity,
        loss_quantity,
        loss_rate: if completed_quantity > 0.0 {
            loss_quantity / completed_quantity * 100.0
        } else {
            0.0
        },
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HrKpis {
    pub headcount: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_department: BTreeMap<String, usize>,
    pub department_count: usize,
}

pub fn hr_kpis(employees: &[employee::Model], department_count: usize) -> HrKpis {
    let mut by_status = BTreeMap::new();
    let mut by_department = BTreeMap::new();
    for e in employees {
        *by_status.entry(e.status.clone()).or_insert(0) += 1;
        if e.status == "active" {
            *by_department.entry(e.department.clone()).or_insert(0) += 1;
        }
    }
    HrKpis {
        headcount: by_status.get("active").copied().unwrap_or(0),
        by_status,
        by_department,
        department_count,
    }
}

async fn module_kpis(db: &DbConn, module: &str) -> AppResult<Value> {
    let value = match module {
        perm::FINANCE => {
            let accounts = account::Entity::find().all(&**db).await?;
            let expenses = expense::Entity::find().all(&**db).await?;
            serde_json::to_value(finance_kpis(&accounts, &expenses, crate::db::today()))?
        }
        perm::INVENTORY => {
            let since = crate::db::now() - chrono::Duration::days(30);
            let materials = raw_material::Entity::find().all(&**db).await?;
            let movements = inventory_movement::Entity::find()
                .filter(inventory_movement::Column::CreatedAt.gte(since))
                .all(&**db)
                .await?;
            serde_json::to_value(inventory_kpis(&materials, &movements))?
        }
        perm::PRODUCTION => {
            let orders = production_order::Entity::find().all(&**db).await?;
            let losses = production_loss::Entity::find().all(&**db).await?;
            serde_json::to_value(production_kpis(&orders, &losses))?
        }
        perm::HR => {
            let employees = employee::Entity::find().all(&**db).await?;
            let departments = department::Entity::find().count(&**db).await?;
            serde_json::to_value(hr_kpis(&employees, departments as usize))?
        }
        other => return Err(AppError::NotFound(format!("Painel '{}'", other))),
    };
    Ok(value)
}

/// GET /api/dashboard/:module
pub async fn get_module_dashboard(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(module): Path<String>,
) -> AppResult<Json<Value>> {
    if [perm::FINANCE, perm::INVENTORY, perm::PRODUCTION, perm::HR].contains(&module.as_str()) {
        current_user.require(&module)?;
    }
    let key = format!("{}:{}", DASHBOARD_KEY, module);
    let value = cached(&state, &key, || module_kpis(&db, &module)).await?;
    Ok(Json(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production(id: i32, status: &str, quantity: f64) -> production_order::Model {
        production_order::Model {
            id,
            order_number: format!("OP-{}", id),
            product_id: None,
            quantity,
            status: status.into(),
            start_date: None,
            end_date: None,
            notes: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn account(id: i32, kind: &str, status: &str, amount: f64, due: NaiveDate) -> account::Model {
        account::Model {
            id,
            description: "x".into(),
            amount,
            due_date: due,
            account_type: kind.into(),
            status: status.into(),
            entity_name: "ACME".into(),
            entity_id: None,
            document_number: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_production_summary_and_recent() {
        let orders = vec![
            production(1, "planned", 10.0),
            production(2, "in-progress", 5.0),
            production(3, "completed", 8.0),
            production(4, "completed", 2.0),
        ];
        let summary = summarize_production(&orders);
        assert_eq!(
            summary,
            ProductionSummary {
                count: 4,
                in_progress: 1,
                completed: 2,
                planned: 1
            }
        );
        let recent = most_recent(&orders, RECENT, |o| o.id);
        assert_eq!(recent.iter().map(|o| o.id).collect::<Vec<_>>(), vec![4, 3, 2]);
    }

    #[test]
    fn test_finance_summary() {
        let due = date(2024, 1, 1);
        let accounts = vec![
            account(1, TYPE_RECEIVABLE, STATUS_PENDING, 100.0, due),
            account(2, TYPE_RECEIVABLE, "paid", 50.0, due),
            account(3, TYPE_PAYABLE, STATUS_PENDING, 70.0, due),
            account(4, TYPE_PAYABLE, "paid", 30.0, due),
        ];
        assert_eq!(
            summarize_finance(&accounts),
            FinancialSummary {
                receivable_total: 150.0,
                upcoming_payments: 1
            }
        );

        let kpis = finance_kpis(&accounts, &[], date(2024, 2, 1));
        assert_eq!(kpis.receivable_pending, 100.0);
        assert_eq!(kpis.payable_pending, 70.0);
        assert_eq!(kpis.overdue_count, 2);
        assert_eq!(kpis.overdue_amount, 170.0);
    }

    #[test]
    fn test_production_kpis_loss_rate() {
        let orders = vec![production(1, "completed", 100.0), production(2, "planned", 50.0)];
        let losses = vec![production_loss::Model {
            id: 1,
            production_order_id: Some(1),
            quantity: 5.0,
            reason: "quebra".into(),
            date: date(2024, 1, 2),
            notes: None,
            created_at: crate::db::now(),
            created_by: None,
        }];
        let kpis = production_kpis(&orders, &losses);
        assert_eq!(kpis.by_status.get("completed"), Some(&1));
        assert_eq!(kpis.planned_quantity, 150.0);
        assert_eq!(kpis.loss_rate, 5.0);
        assert_eq!(production_kpis(&[], &losses).loss_rate, 0.0);
    }

    fn state() -> AppState {
        let db = sea_orm::MockDatabase::new(sea_orm::DatabaseBackend::Postgres).into_connection();
        AppState::new(db, crate::Config::default())
    }

    #[tokio::test]
    async fn test_cached_serves_hits() {
        let state = state();
        let first = cached(&state, DASHBOARD_KEY, || async { Ok(1) }).await.unwrap();
        let second = cached(&state, DASHBOARD_KEY, || async { Ok(2) }).await.unwrap();
        assert_eq!(first, serde_json::json!(1));
        assert_eq!(second, serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_cached_drops_result_invalidated_mid_compute() {
        let state = state();
        let writer = state.clone();
        let value = cached(&state, DASHBOARD_KEY, || async move {
            writer.invalidate_dashboard();
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(value, serde_json::json!(7));
        assert!(state.dashboard_cache.get(DASHBOARD_KEY).is_none());

        let fresh = cached(&state, DASHBOARD_KEY, || async { Ok(8) }).await.unwrap();
        assert_eq!(fresh, serde_json::json!(8));
        assert_eq!(state.dashboard_cache.get(DASHBOARD_KEY), Some(serde_json::json!(8)));
    }
}
