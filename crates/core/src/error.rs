//! Core error types

use thiserror::Error;

/// Core error type for Skyhaul
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration value is present but unusable
    #[error("Invalid config value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
