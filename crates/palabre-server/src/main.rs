//! # palabre-server
//!
//! HTTP/WebSocket front for the Palabre delivery core.
//!
//! This binary provides:
//! - **REST API** (axum) for conversations, messages, read markers, calls,
//!   and notifications
//! - **WebSocket delivery** (`GET /ws`) pushing message, call, and
//!   notification events to subscribed clients
//! - **SQLite persistence** via the embedded store (WAL mode, migrated on
//!   startup)

mod api;
mod config;
mod error;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use palabre_hub::{Hub, HubConfig};
use palabre_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palabre_server=debug")),
        )
        .init();

    info!("Starting Palabre server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database (creates and migrates if missing)
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.db_path)?;
    info!(path = %config.db_path.display(), "Database ready");

    // -----------------------------------------------------------------------
    // 4. Build the hub
    // -----------------------------------------------------------------------
    let hub = Hub::new(
        db,
        HubConfig {
            ring_timeout: Duration::from_secs(config.ring_timeout_secs),
        },
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    info!("Server stopped");
    Ok(())
}
