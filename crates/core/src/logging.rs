//! Structured logging infrastructure for Beacon.
//!
//! Centralized `tracing` subscriber setup. `RUST_LOG` always wins; the
//! configured level is only the fallback filter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

fn filter_or(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging system with human-readable output.
///
/// # Example
/// ```no_run
/// use beacon_core::logging;
///
/// logging::init();
/// tracing::info!("Dispatch node started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter_or("info"))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for log aggregation.
///
/// # Example
/// ```no_run
/// use beacon_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "beacon-node", "Service started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(filter_or("info"))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize logging from configuration.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    let filter = filter_or(&config.level);
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok()
    }
}
