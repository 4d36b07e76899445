use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use custosmart::{db, error, handlers, routes, AppState, Config};

const DEFAULT_CONFIG_PATH: &str = "./etc/custosmart.toml";
const DEFAULT_ADDR: &str = "0.0.0.0:5000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "-help" || arg == "--help") {
        println!("Usage: custosmart [OPTIONS]");
        println!("Options:");
        println!(
            "  -config <path>  Path to configuration file (default: {})",
            DEFAULT_CONFIG_PATH
        );
        println!("  -help, --help   Print this help message");
        println!();
        println!("Environment: DATABASE_URL, APP_ENV (or NODE_ENV), RUST_LOG");
        return Ok(());
    }

    let config_path = args
        .iter()
        .skip_while(|arg| arg.as_str() != "-config")
        .nth(1)
        .map(|s| s.to_string())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Load configuration first (before logging init)
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Could not load config file: {}, using defaults", e);
        let mut config = Config::default();
        config.apply_env(|key| env::var(key).ok());
        config
    });

    // Priority: RUST_LOG env var > config file > default "info"
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting CustoSmart server...");
    info!("Loading configuration from: {}", config_path);
    info!("Environment: {}", config.environment);

    error::set_production(config.is_production());

    let db = db::init_database(&config.database).await.map_err(|e| {
        tracing::error!("Database initialization failed: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;

    handlers::audit::service::init(db.clone());
    info!("Audit log service initialized");

    let state = AppState::new(db, config.clone());
    state.dashboard_cache.spawn_janitor();

    let app = routes::create_router(state);

    let addr: SocketAddr = match config.addr.parse() {
        Ok(addr) => addr,
        Err(_) => {
            tracing::warn!("Invalid address '{}', using default {}", config.addr, DEFAULT_ADDR);
            DEFAULT_ADDR.parse()?
        }
    };

    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
