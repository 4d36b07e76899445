use sea_orm::sea_query::TableCreateStatement;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbBackend, DbErr, EntityTrait, QueryFilter, Schema, Set, Statement,
};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::entity::{
    account, chat_message, chat_room, chat_room_participant, company, customer, department,
    employee, equipment, expense, fiscal_config, inventory_movement, maintenance_order, nfe,
    nfe_evento, nfe_item, order, order_item, product, product_formula, product_pricing,
    production_loss, production_order, quality_inspection,
    quotation, quotation_item, raw_material, supplier, supplier_quotation, support_ticket,
    system_alert, system_audit_log, user,
};
use crate::permission::{Permissions, ADMIN_ROLE};

/// Seeded administrator credentials
pub const DEFAULT_ADMIN_USERNAME: &str = "administrador";
const DEFAULT_ADMIN_PASSWORD: &str = "administrador";

/// Current UTC time as stored in timestamp columns
pub fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Current UTC date
pub fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Initialize database connection, auto-migrate tables and seed the administrator
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(config.connection_url());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(60))
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .set_schema_search_path("public");

    let db = Database::connect(opt).await?;
    info!("Database connection established");

    auto_migrate(&db).await?;
    seed_admin(&db).await?;

    Ok(db)
}

/// Create missing tables
async fn auto_migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    info!("Running auto-migration for all entities...");

    let statements = vec![
        // 1. Independent tables
        schema.create_table_from_entity(user::Entity),
        schema.create_table_from_entity(company::Entity),
        schema.create_table_from_entity(product::Entity),
        schema.create_table_from_entity(equipment::Entity),
        schema.create_table_from_entity(raw_material::Entity),
        schema.create_table_from_entity(customer::Entity),
        schema.create_table_from_entity(supplier::Entity),
        schema.create_table_from_entity(expense::Entity),
        schema.create_table_from_entity(account::Entity),
        schema.create_table_from_entity(quality_inspection::Entity),
        schema.create_table_from_entity(quotation::Entity),
        schema.create_table_from_entity(employee::Entity),
        schema.create_table_from_entity(system_alert::Entity),
        schema.create_table_from_entity(system_audit_log::Entity),
        schema.create_table_from_entity(fiscal_config::Entity),
        schema.create_table_from_entity(chat_room::Entity),
        // 2. Tables with foreign key dependencies
        schema.create_table_from_entity(production_order::Entity),
        schema.create_table_from_entity(production_loss::Entity),
        schema.create_table_from_entity(maintenance_order::Entity),
        schema.create_table_from_entity(inventory_movement::Entity),
        schema.create_table_from_entity(order::Entity),
        schema.create_table_from_entity(order_item::Entity),
        schema.create_table_from_entity(quotation_item::Entity),
        schema.create_table_from_entity(supplier_quotation::Entity),
        schema.create_table_from_entity(product_pricing::Entity),
        schema.create_table_from_entity(department::Entity),
        schema.create_table_from_entity(support_ticket::Entity),
        schema.create_table_from_entity(nfe::Entity),
        schema.create_table_from_entity(nfe_item::Entity),
        schema.create_table_from_entity(nfe_evento::Entity),
        schema.create_table_from_entity(product_formula::Entity),
        schema.create_table_from_entity(chat_room_participant::Entity),
        schema.create_table_from_entity(chat_message::Entity),
    ];

    for stmt in statements {
        create_table_if_not_exists(db, backend, stmt).await?;
    }

    info!("Auto-migration completed successfully");
    Ok(())
}

/// Create a table if it doesn't exist
async fn create_table_if_not_exists(
    db: &DatabaseConnection,
    backend: DbBackend,
    mut stmt: TableCreateStatement,
) -> Result<(), DbErr> {
    stmt.if_not_exists();

    let sql = backend.build(&stmt);

    db.execute(Statement::from_string(backend, sql.to_string())).await?;

    Ok(())
}

/// Insert the default administrator when no account with that username exists.
/// Returns true when a row was created.
pub async fn seed_admin<C: ConnectionTrait>(db: &C) -> Result<bool, DbErr> {
    let existing = user::Entity::find()
        .filter(user::Column::Username.eq(DEFAULT_ADMIN_USERNAME))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(false);
    }

    let hash = bcrypt::hash(DEFAULT_ADMIN_PASSWORD, bcrypt::DEFAULT_COST)
        .map_err(|e| DbErr::Custom(format!("Failed to hash admin password: {}", e)))?;

    user::ActiveModel {
        username: Set(DEFAULT_ADMIN_USERNAME.to_string()),
        password: Set(hash),
        full_name: Set("Administrador".to_string()),
        email: Set("admin@custosmart.local".to_string()),
        role: Set(ADMIN_ROLE.to_string()),
        active: Set(true),
        status: Set(Some("offline".to_string())),
        status_message: Set(None),
        permissions: Set(Permissions::all().to_json()),
        created_at: Set(now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!("Default administrator '{}' created", DEFAULT_ADMIN_USERNAME);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn admin_row() -> user::Model {
        user::Model {
            id: 1,
            username: DEFAULT_ADMIN_USERNAME.to_string(),
            password: "hash".to_string(),
            full_name: "Administrador".to_string(),
            email: "admin@custosmart.local".to_string(),
            role: ADMIN_ROLE.to_string(),
            active: true,
            status: None,
            status_message: None,
            permissions: Permissions::all().to_json(),
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn test_seed_admin_skips_existing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![admin_row()]])
            .into_connection();
        assert!(!seed_admin(&db).await.unwrap());
    }

    #[tokio::test]
    async fn test_seed_admin_creates_missing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user::Model>::new()])
            .append_query_results([vec![admin_row()]])
            .into_connection();
        assert!(seed_admin(&db).await.unwrap());
    }

    #[test]
    fn test_create_statement_is_idempotent() {
        let schema = Schema::new(DbBackend::Postgres);
        let mut stmt = schema.create_table_from_entity(order_item::Entity);
        stmt.if_not_exists();
        let sql = DbBackend::Postgres.build(&stmt).to_string();
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "order_items""#));
        assert!(sql.contains("FOREIGN KEY"));
    }
}
