//! Configuration for the island server
//!
//! Settings come from a TOML file, with command-line flags layered on top.

pub mod args;
pub mod settings;

pub use args::Args;
pub use settings::{Config, IslandSettings, LoggingSettings};

use anyhow::Result;
use tracing::{info, warn};

/// Load configuration from file or create default configuration
///
/// A missing file is created with the defaults so operators have something
/// to edit. Command-line overrides are applied and the result validated.
///
/// # Arguments
/// * `args` - Command line arguments with the config path and overrides
///
/// # Returns
/// * `Result<Config>` - The loaded or default configuration
///
/// # Errors
/// * Returns error if file I/O operations fail
/// * Returns error if TOML parsing fails
/// * Returns error if `--bind` is malformed or a value fails validation
pub async fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config).await?;
        match toml::from_str::<Config>(&config_str) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to parse config file {}: {}", args.config.display(), e);
                return Err(e.into());
            }
        }
    } else {
        warn!("Configuration file not found: {}, using defaults", args.config.display());

        let default_config = Config::default();
        let config_str = toml::to_string_pretty(&default_config)?;
        tokio::fs::write(&args.config, config_str).await?;
        info!("Created default configuration file: {}", args.config.display());

        default_config
    };

    config.apply_args(args)?;
    config.validate()?;
    Ok(config)
}
