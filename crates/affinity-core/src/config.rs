//! AffinityBots scheduling-core configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            worker: WorkerConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl AffinityConfig {
    /// Load config from the default path (~/.affinity/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AffinityBots home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".affinity")
    }
}

/// Persistence store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.affinity/scheduler.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Gateway (HTTP API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Shared API token required on management routes. Empty = open.
    #[serde(default)]
    pub api_token: String,
}

fn default_port() -> u16 { 8090 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_token: String::new(),
        }
    }
}

/// Schedule worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between due-job checks.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Upper bound on stored error detail per execution record.
    #[serde(default = "default_max_error_len")]
    pub max_error_len: usize,
}

fn default_tick_secs() -> u64 { 15 }
fn default_max_error_len() -> usize { 500 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_error_len: default_max_error_len(),
        }
    }
}

/// Workflow execution endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Base URL of the workflow execution service.
    #[serde(default = "default_execution_url")]
    pub endpoint: String,
    /// Kickoff request timeout in seconds.
    #[serde(default = "default_invoke_timeout")]
    pub timeout_secs: u64,
    /// Bearer token sent to the execution endpoint, if any.
    #[serde(default)]
    pub auth_token: String,
}

fn default_execution_url() -> String { "http://127.0.0.1:8123".into() }
fn default_invoke_timeout() -> u64 { 30 }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_execution_url(),
            timeout_secs: default_invoke_timeout(),
            auth_token: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AffinityConfig::default();
        assert_eq!(cfg.gateway.port, 8090);
        assert_eq!(cfg.worker.tick_secs, 15);
        assert_eq!(cfg.worker.max_error_len, 500);
        assert!(cfg.gateway.api_token.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: AffinityConfig = toml::from_str(
            r#"
            [gateway]
            port = 9999

            [execution]
            endpoint = "http://executor:4000"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.gateway.port, 9999);
        assert_eq!(cfg.execution.endpoint, "http://executor:4000");
        // Untouched sections fall back to defaults
        assert_eq!(cfg.worker.tick_secs, 15);
    }
}
