//! Core functionality shared by the Skyhaul delivery services.
//!
//! This crate provides configuration loading, logging initialisation and
//! the error type used before the fleet engine is up.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DatabaseConfig, LoggingConfig, ServerConfig};
pub use error::{CoreError, Result};
