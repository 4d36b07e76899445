use axum::{
    extract::Request,
    middleware::{self, Next},
    routing::{get, patch, post},
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use time::Duration;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::error::api_not_found;
use crate::handlers;
use crate::middleware::{auth_layer, require_permission};
use crate::permission::perm;
use crate::state::AppState;
use crate::ws;

pub mod health;

/// Message envelope for endpoints without a resource body
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn success_msg(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Gate every route of `router` behind one module flag
fn gated(flag: &'static str, router: Router<AppState>) -> Router<AppState> {
    router.route_layer(middleware::from_fn(move |req: Request, next: Next| {
        require_permission(flag, req, next)
    }))
}

fn production_routes() -> Router<AppState> {
    use handlers::production::*;
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).patch(update_product).delete(delete_product),
        )
        .route(
            "/products/:id/formula",
            get(get_product_formula).put(update_product_formula),
        )
        .route(
            "/production-orders",
            get(list_production_orders).post(create_production_order),
        )
        .route(
            "/production-orders/:id",
            get(get_production_order)
                .patch(update_production_order)
                .delete(delete_production_order),
        )
        .route(
            "/production-losses",
            get(list_production_losses).post(create_production_loss),
        )
        .route(
            "/production-losses/:id",
            patch(update_production_loss).delete(delete_production_loss),
        )
}

fn maintenance_routes() -> Router<AppState> {
    use handlers::maintenance::*;
    Router::new()
        .route("/equipment", get(list_equipment).post(create_equipment))
        .route(
            "/equipment/:id",
            get(get_equipment).patch(update_equipment).delete(delete_equipment),
        )
        .route(
            "/maintenance-orders",
            get(list_maintenance_orders).post(create_maintenance_order),
        )
        .route(
            "/maintenance-orders/:id",
            get(get_maintenance_order)
                .patch(update_maintenance_order)
                .delete(delete_maintenance_order),
        )
        .route(
            "/maintenance-orders/:id/complete",
            post(complete_maintenance_order),
        )
}

fn inventory_routes() -> Router<AppState> {
    use handlers::inventory::*;
    Router::new()
        .route("/raw-materials", get(list_raw_materials).post(create_raw_material))
        .route(
            "/raw-materials/:id",
            get(get_raw_material)
                .patch(update_raw_material)
                .delete(delete_raw_material),
        )
        .route("/inventory", get(list_movements).post(create_movement))
}

fn finance_routes() -> Router<AppState> {
    use handlers::finance::*;
    Router::new()
        .route("/accounts", get(list_accounts).post(create_account))
        .route(
            "/accounts/:id",
            get(get_account).patch(update_account).delete(delete_account),
        )
        .route("/accounts/:id/pay", post(pay_account))
        .route("/expenses", get(list_expenses).post(create_expense))
        .route(
            "/expenses/:id",
            get(get_expense).patch(update_expense).delete(delete_expense),
        )
}

fn quality_routes() -> Router<AppState> {
    use handlers::quality::*;
    Router::new()
        .route(
            "/quality-inspections",
            get(list_inspections).post(create_inspection),
        )
        .route(
            "/quality-inspections/:id",
            get(get_inspection)
                .patch(update_inspection)
                .delete(delete_inspection),
        )
}

fn commercial_routes() -> Router<AppState> {
    use handlers::commercial::*;
    use handlers::pricing::*;
    Router::new()
        .route("/customers", get(list_customers).post(create_customer))
        .route(
            "/customers/:id",
            get(get_customer).patch(update_customer).delete(delete_customer),
        )
        .route("/orders", get(list_orders).post(create_order))
        .route(
            "/orders/:id",
            get(get_order).patch(update_order).delete(delete_order),
        )
        .route("/product-pricings", get(list_pricings).post(create_pricing))
        .route("/product-pricings/simulate", post(simulate_pricing))
        .route(
            "/product-pricings/product/:product_id",
            get(list_pricings_for_product),
        )
        .route(
            "/product-pricings/:id",
            get(get_pricing).patch(update_pricing).delete(delete_pricing),
        )
        .route("/product-costs/simulate", post(simulate_production_cost))
        .route("/product-costs/:id", get(get_product_cost))
        .route(
            "/products/:id/recalculate-price",
            post(recalculate_product_price),
        )
}

fn purchase_routes() -> Router<AppState> {
    use handlers::purchase::*;
    Router::new()
        .route("/suppliers", get(list_suppliers).post(create_supplier))
        .route(
            "/suppliers/:id",
            get(get_supplier).patch(update_supplier).delete(delete_supplier),
        )
        .route("/quotations", get(list_quotations).post(create_quotation))
        .route(
            "/quotations/:id",
            get(get_quotation).patch(update_quotation).delete(delete_quotation),
        )
        .route("/quotations/:id/items", get(list_quotation_items))
        .route("/quotations/:id/apply-prices", post(apply_quotation_prices))
        .route("/quotation-items", post(create_quotation_item))
        .route(
            "/quotation-items/:id",
            patch(update_quotation_item).delete(delete_quotation_item),
        )
        .route(
            "/quotation-items/:id/supplier-quotations",
            get(list_supplier_quotations),
        )
        .route("/quotation-items/:id/best", get(best_supplier_quotation))
        .route("/supplier-quotations", post(create_supplier_quotation))
        .route(
            "/supplier-quotations/:id",
            patch(update_supplier_quotation).delete(delete_supplier_quotation),
        )
        .route(
            "/supplier-quotations/:id/select",
            post(select_supplier_quotation),
        )
}

fn hr_routes() -> Router<AppState> {
    use handlers::hr::*;
    Router::new()
        .route("/employees", get(list_employees).post(create_employee))
        .route(
            "/employees/:id",
            get(get_employee).patch(update_employee).delete(delete_employee),
        )
        .route("/departments", get(list_departments).post(create_department))
        .route("/departments/tree", get(department_tree))
        .route(
            "/departments/:id",
            get(get_department)
                .patch(update_department)
                .delete(delete_department),
        )
}

fn chat_routes() -> Router<AppState> {
    use handlers::chat::*;
    Router::new()
        .route("/chat/users", get(list_chat_users))
        .route("/chat/rooms", get(list_rooms).post(create_room))
        .route("/chat/rooms/:id", axum::routing::delete(delete_room))
        .route("/chat/rooms/:id/messages", get(list_messages))
        .route("/chat/rooms/:id/read", post(mark_room_read))
        .route("/chat/unread", get(get_unread))
}

fn fiscal_routes() -> Router<AppState> {
    use handlers::fiscal::*;
    Router::new()
        .route(
            "/fiscal/config",
            get(get_fiscal_config).post(create_fiscal_config),
        )
        .route("/fiscal/config/:id", axum::routing::put(update_fiscal_config))
        .route("/fiscal/nfe", get(list_nfes).post(create_nfe))
        .route(
            "/fiscal/nfe/:id",
            get(get_nfe).patch(update_nfe).delete(delete_nfe),
        )
        .route("/fiscal/nfe/:id/cancel", post(cancel_nfe))
        .route("/fiscal/nfe/:id/eventos", get(list_nfe_events))
        .route("/fiscal/nfe/:id/itens", get(list_nfe_items))
        .route("/fiscal/nfe/:id/item", post(create_nfe_item))
        .route(
            "/fiscal/nfe/item/:id",
            patch(update_nfe_item).delete(delete_nfe_item),
        )
        .route("/fiscal/nfe/chave/:chave", get(get_nfe_by_key))
}

fn admin_routes() -> Router<AppState> {
    use handlers::user::*;
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", patch(update_user).delete(delete_user))
        .route("/users/:id/password", patch(reset_password))
        .route("/users/:id/permissions", patch(update_permissions))
        .route(
            "/system-audit-logs",
            get(handlers::audit::list_audit_logs),
        )
}

/// Routes any authenticated user may call; handlers check finer rules
fn common_routes() -> Router<AppState> {
    use handlers::{alerts, auth, company, dashboard, export, support};
    Router::new()
        .route("/health", get(health::health_check))
        .route("/access", get(handlers::access::check_access))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/user", get(auth::current_user))
        .route(
            "/company",
            get(company::get_company).put(company::save_company),
        )
        .route("/dashboard/:module", get(dashboard::get_module_dashboard))
        .route("/alerts", get(alerts::list_alerts).post(alerts::create_alert))
        .route("/alerts/active", get(alerts::list_active_alerts))
        .route("/alerts/:id", axum::routing::delete(alerts::delete_alert))
        .route("/alerts/:id/acknowledge", post(alerts::acknowledge_alert))
        .route("/alerts/:id/resolve", post(alerts::resolve_alert))
        .route(
            "/support/tickets",
            get(support::list_tickets).post(support::create_ticket),
        )
        .route(
            "/support/tickets/:id",
            get(support::get_ticket)
                .patch(support::update_ticket)
                .delete(support::delete_ticket),
        )
        .route("/support/tickets/:id/assign", post(support::assign_ticket))
        .route("/export/:file", get(export::export_resource))
}

/// All `/api` routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(common_routes())
        .merge(gated(
            perm::DASHBOARD,
            Router::new().route("/dashboard", get(handlers::dashboard::get_dashboard)),
        ))
        .merge(gated(perm::ADMIN, admin_routes()))
        .merge(gated(perm::PRODUCTION, production_routes()))
        .merge(gated(perm::MAINTENANCE, maintenance_routes()))
        .merge(gated(perm::INVENTORY, inventory_routes()))
        .merge(gated(perm::FINANCE, finance_routes()))
        .merge(gated(perm::QUALITY, quality_routes()))
        .merge(gated(perm::COMMERCIAL, commercial_routes()))
        .merge(gated(perm::PURCHASE, purchase_routes()))
        .merge(gated(perm::HR, hr_routes()))
        .merge(gated(perm::CHAT, chat_routes()))
        .merge(gated(perm::FISCAL, fiscal_routes()))
        .fallback(api_not_found)
}

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.config.session.secure)
        .with_http_only(true)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            state.config.session.max_age_hours,
        )));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // SPA build, unknown paths fall back to index.html for client routing
    let static_dir = &state.config.static_dir;
    let serve_dir =
        ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));

    let websocket = gated(perm::CHAT, Router::new().route("/ws", get(ws::serve_ws)));

    Router::new()
        .nest("/api", api_routes())
        .merge(websocket)
        .fallback_service(serve_dir)
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use tower::ServiceExt;

    fn app() -> Router {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        create_router(AppState::new(db, Config::default()))
    }

    async fn status_of(uri: &str) -> StatusCode {
        let request = HttpRequest::builder().uri(uri).body(Body::empty()).unwrap();
        app().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        assert_eq!(status_of("/api/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_access_check_is_public() {
        assert_eq!(status_of("/api/access?path=/finance").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_require_session() {
        assert_eq!(status_of("/api/products").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("/api/fiscal/nfe").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("/api/export/accounts.csv").await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_nested_routes_are_gated() {
        for uri in [
            "/api/fiscal/nfe/chave/35240612345678000195550010000000021876543218",
            "/api/fiscal/nfe/4/eventos",
            "/api/fiscal/nfe/4/itens",
            "/api/products/3/formula",
            "/api/product-costs/3",
        ] {
            assert_eq!(status_of(uri).await, StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_websocket_requires_session() {
        assert_eq!(status_of("/ws").await, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_api_response_shape() {
        let body = serde_json::to_value(ApiResponse::success_msg("ok")).unwrap();
        assert_eq!(body, serde_json::json!({"success": true, "message": "ok"}));
    }
}
