//! Logging system setup
//!
//! Installs the global tracing subscriber. `RUST_LOG` takes precedence over
//! the configured level.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Builds the filter from `RUST_LOG`, falling back to `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the logging system with human-readable or JSON output
///
/// # Arguments
/// * `settings` - Level and output format from the `[logging]` table
///
/// # Returns
/// * `Result<()>` - Success or error during logging setup
///
/// # Environment Variables
/// * `RUST_LOG` - Override the configured filter (e.g., "debug", "socket_engine=trace")
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = env_filter(&settings.level);

    if settings.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()?;
    }

    Ok(())
}
