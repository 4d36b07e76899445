use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::Config;

/// Cache key for the main dashboard summary
pub const DASHBOARD_KEY: &str = "dashboard";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: DatabaseConnection,
    /// Application configuration
    pub config: Arc<Config>,
    /// Cached dashboard aggregates
    pub dashboard_cache: TtlCache<serde_json::Value>,
}

impl AppState {
    /// Create new application state
    pub fn new(db: DatabaseConnection, config: Config) -> Self {
        let dashboard_cache = TtlCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        );

        Self {
            db,
            config: Arc::new(config),
            dashboard_cache,
        }
    }

    /// Drop cached dashboard data after a write in one of the summarized modules
    pub fn invalidate_dashboard(&self) {
        self.dashboard_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn test_invalidate_dashboard() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let state = AppState::new(db, Config::default());
        state.dashboard_cache.set(DASHBOARD_KEY, serde_json::json!({"a": 1}));
        state.dashboard_cache.set("dashboard:finance", serde_json::json!({}));
        state.invalidate_dashboard();
        assert!(state.dashboard_cache.is_empty());
    }
}
