//! Configuration management for Skyhaul.
//!
//! Values come from an optional TOML file and are then overridden by
//! `SKYHAUL_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{CoreError, Result};

/// Database path that opens a transient in-memory store
pub const IN_MEMORY_DB: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_db_path() -> String {
    "skyhaul.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load the file (when given) and apply environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default_config(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognised keys: `SKYHAUL_BIND_ADDR`, `SKYHAUL_PORT`, `SKYHAUL_DB_PATH`,
    /// `SKYHAUL_LOG_LEVEL`, `SKYHAUL_LOG_JSON`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        if let Some(addr) = lookup("SKYHAUL_BIND_ADDR") {
            self.server.bind_addr = addr;
            applied.push("SKYHAUL_BIND_ADDR");
        }
        if let Some(port) = lookup("SKYHAUL_PORT") {
            self.server.port = port.parse().map_err(|_| CoreError::InvalidValue {
                key: "SKYHAUL_PORT".to_string(),
                reason: format!("'{}' is not a port number", port),
            })?;
            applied.push("SKYHAUL_PORT");
        }
        if let Some(path) = lookup("SKYHAUL_DB_PATH") {
            self.database.path = path;
            applied.push("SKYHAUL_DB_PATH");
        }
        if let Some(level) = lookup("SKYHAUL_LOG_LEVEL") {
            self.logging.level = level;
            applied.push("SKYHAUL_LOG_LEVEL");
        }
        if let Some(json) = lookup("SKYHAUL_LOG_JSON") {
            self.logging.json = match json.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(CoreError::InvalidValue {
                        key: "SKYHAUL_LOG_JSON".to_string(),
                        reason: format!("'{}' is not a boolean", other),
                    })
                }
            };
            applied.push("SKYHAUL_LOG_JSON");
        }

        if !applied.is_empty() {
            debug!(keys = ?applied, "Configuration overrides applied");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.port)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.path == IN_MEMORY_DB
    }
}
