//! CustoSmart - industrial ERP backend
//!
//! Session-authenticated REST API over PostgreSQL for production, maintenance,
//! inventory, finance, commercial, purchasing, quality, HR, fiscal and support,
//! plus a WebSocket chat and alert feed. Module flags on each user gate the
//! routes of each area.

pub mod cache;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod export;
pub mod handlers;
pub mod middleware;
pub mod pagination;
pub mod permission;
pub mod routes;
pub mod state;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use state::AppState;
