//! Structured logging infrastructure for Skyhaul.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Build the level filter, preferring `RUST_LOG` over the configured level.
pub fn filter_for(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging system with human readable output.
///
/// # Example
/// ```no_run
/// use skyhaul_core::logging;
///
/// logging::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter_for(default_level))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for production environments.
///
/// This format is suitable for log aggregation systems and structured log analysis.
pub fn init_json(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter_for(default_level))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize from the `[logging]` config section.
pub fn init_from(config: &LoggingConfig) {
    if config.json {
        init_json(&config.level);
    } else {
        init(&config.level);
    }
    tracing::debug!(level = %config.level, json = config.json, "Logging initialised");
}
