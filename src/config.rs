//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP listen configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Presence hub tuning.
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP + WebSocket listener binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> SocketAddr {
    "127.0.0.1:8080".parse().expect("static listen address")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path; `:memory:` for an in-memory database.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "velvetd.db".to_string()
}

/// Presence hub timing knobs.
///
/// Clients are expected to PING at least every 10 seconds; the 90 second
/// threshold tolerates roughly nine missed pings of network jitter before
/// a client is declared stale.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Seconds of heartbeat silence after which a client is evicted.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Seconds between stale-connection sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Milliseconds over which presence updates to admins are coalesced.
    #[serde(default = "default_presence_debounce")]
    pub presence_debounce_ms: u64,
    /// Milliseconds granted to writers to flush before a forced disconnect.
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            presence_debounce_ms: default_presence_debounce(),
            disconnect_grace_ms: default_disconnect_grace(),
        }
    }
}

fn default_heartbeat_timeout() -> u64 {
    90
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_presence_debounce() -> u64 {
    500
}

fn default_disconnect_grace() -> u64 {
    100
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: defaults are used so the daemon can
    /// run without any on-disk configuration.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            tracing::info!(path = %path, "No config file found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
