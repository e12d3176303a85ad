/// Configuration management for the radflow engine
///
/// Handles server configuration, the database connection and engine limits.

use crate::runtime::executor::{ExecutorSettings, DEFAULT_ACTION_TIMEOUT, DEFAULT_NODE_VISIT_CAP};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL holding automations and execution records (e.g. "sqlite://data/radflow.db")
    pub url: String,
}

/// Limits applied to every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Node visits allowed per run before traversal stops
    pub node_visit_cap: u32,
    /// Default per-action timeout in milliseconds
    pub action_timeout_ms: u64,
}

impl EngineConfig {
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            node_visit_cap: self.node_visit_cap,
            action_timeout: Duration::from_millis(self.action_timeout_ms),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("RADFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("RADFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                url: std::env::var("RADFLOW_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/radflow.db".to_string()),
            },
            engine: EngineConfig {
                node_visit_cap: env_or("RADFLOW_NODE_VISIT_CAP", DEFAULT_NODE_VISIT_CAP),
                action_timeout_ms: env_or(
                    "RADFLOW_ACTION_TIMEOUT_MS",
                    DEFAULT_ACTION_TIMEOUT.as_millis() as u64,
                ),
            },
        }
    }
}

/// Parse an env var, falling back to `default` when unset or malformed
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_maps_to_executor_settings() {
        let engine = EngineConfig {
            node_visit_cap: 12,
            action_timeout_ms: 1500,
        };
        let settings = engine.executor_settings();
        assert_eq!(settings.node_visit_cap, 12);
        assert_eq!(settings.action_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        assert_eq!(env_or("RADFLOW_TEST_UNSET_VARIABLE", 42u32), 42);
    }
}
