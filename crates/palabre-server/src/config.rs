//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use palabre_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_RING_TIMEOUT_SECS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./palabre.db`
    pub db_path: PathBuf,

    /// Seconds a call may ring before being settled as missed.
    /// Env: `RING_TIMEOUT_SECS`
    /// Default: `45`
    pub ring_timeout_secs: u64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Palabre Hub"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_path: PathBuf::from("./palabre.db"),
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
            instance_name: "Palabre Hub".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("RING_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                if secs > 0 {
                    config.ring_timeout_secs = secs;
                } else {
                    tracing::warn!("RING_TIMEOUT_SECS must be positive, using default");
                }
            } else {
                tracing::warn!(value = %val, "Invalid RING_TIMEOUT_SECS, using default");
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
