//! Log subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::MonitoringConfig;
use crate::error::{Error, Result};

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &MonitoringConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            Error::Configuration(format!("invalid log level '{}': {}", config.log_level, e))
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = if config.structured_logging {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::Configuration(format!("failed to install log subscriber: {}", e)))
}
