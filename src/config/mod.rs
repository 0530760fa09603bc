//! Configuration management for the relayflow engine
//!
//! Handles server binding, the SQLite connection string, per-node execution limits and the
//! externally visible base URL used when handing out webhook addresses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Execution engine limits
    pub engine: EngineConfig,
    /// Webhook addressing
    pub webhooks: WebhookConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, e.g. "sqlite://data/relayflow.db" or "sqlite::memory:"
    pub url: String,
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline applied to every single node execution
    pub node_timeout_secs: u64,
    /// Interval of the orphaned-trigger cleanup sweep (0 disables it)
    pub cleanup_interval_secs: u64,
}

/// Webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Base URL prepended to `/webhook/{path}` in generated webhook URLs
    pub public_base_url: String,
}

impl EngineConfig {
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let host = env_or("RELAYFLOW_HOST", "0.0.0.0");
        let port = env_parse("RELAYFLOW_PORT", 3004u16);
        let public_base_url = std::env::var("RELAYFLOW_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: env_or("RELAYFLOW_DATABASE_URL", "sqlite://data/relayflow.db"),
            },
            engine: EngineConfig {
                node_timeout_secs: env_parse("RELAYFLOW_NODE_TIMEOUT_SECS", 30),
                cleanup_interval_secs: env_parse("RELAYFLOW_CLEANUP_INTERVAL_SECS", 3600),
            },
            webhooks: WebhookConfig {
                public_base_url: public_base_url.trim_end_matches('/').to_string(),
            },
        }
    }
}
