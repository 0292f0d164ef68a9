//! Tablesync control server
//!
//! Runs the sync engine in the background and exposes an HTTP control
//! surface for it.
//!
//! # Configuration
//!
//! Environment variables (override the config file):
//! - `TABLESYNC_CONFIG`: Path to config file (default: ~/.config/tablesync/config.yaml)
//! - `TABLESYNC_REMOTE_URL`, `TABLESYNC_REMOTE_KEY`: Remote data store endpoint and key
//! - `TABLESYNC_LOCAL_URL`: Local SQLite database URL
//! - `TABLESYNC_TABLES`: Comma-separated `name[:primary_key[:timestamp_column]]`
//! - `TABLESYNC_INTERVAL_MS`, `TABLESYNC_READ_ONLY`, `TABLESYNC_PUSH_BATCH_SIZE`
//! - `TABLESYNC_PORT`: Port to listen on (default: 8787)
//! - `TABLESYNC_AUTO_START`: Start the scheduler on boot
//!
//! # Endpoints
//!
//! - `GET /health`: Liveness check
//! - `POST /start`, `POST /stop`: Control the scheduler
//! - `GET /status`: Running flag and per-table counts
//! - `POST /sync-table/{name}`: Sync one table immediately
//! - `GET /config`: Configuration with credentials masked

use std::net::SocketAddr;
use std::path::PathBuf;

use tablesync::{server, Config, SyncEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablesync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("TABLESYNC_CONFIG").ok().map(PathBuf::from);
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = &config.config_file {
        tracing::info!("Config file: {}", path.display());
    }

    let sync_config = match config.sync_config() {
        Ok(sync_config) => sync_config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Replicating {} table(s) every {}ms{}",
        sync_config.tables.len(),
        sync_config.tick_interval.as_millis(),
        if sync_config.read_only { " (read-only)" } else { "" }
    );

    let engine = match SyncEngine::connect(sync_config).await {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    if config.auto_start {
        if let Err(e) = engine.start().await {
            tracing::error!("Failed to start scheduler: {}", e);
            std::process::exit(1);
        }
    }

    let app = server::router(engine.clone());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    engine.stop().await;
}
