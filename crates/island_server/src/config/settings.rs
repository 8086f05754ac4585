//! Configuration settings structures
//!
//! The TOML file has three tables: `[server]` is handed to the socket engine
//! unchanged, `[island]` tunes the relay and `[logging]` the subscriber.

use super::Args;
use anyhow::{bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use socket_engine::EngineConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Socket engine settings
    pub server: EngineConfig,
    /// Relay behaviour
    pub island: IslandSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Island relay settings
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IslandSettings {
    /// Island name announced to players in the welcome message
    pub name: String,

    /// Close connections that sent nothing for this many milliseconds.
    /// 0 disables the check.
    pub idle_timeout_ms: u64,
}

impl Default for IslandSettings {
    fn default() -> Self {
        Self {
            name: "Cartographica".to_string(),
            idle_timeout_ms: 60_000,
        }
    }
}

/// Logging configuration settings
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Config {
    /// Applies command-line overrides on top of the file values.
    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        if let Some(bind) = &args.bind {
            let (host, port) = split_bind_address(bind)?;
            self.server.host = host;
            self.server.port = port;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.debug {
            self.logging.level = "debug".to_string();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        Ok(())
    }

    /// Checks values that would otherwise fail later at startup.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {LOG_LEVELS:?}",
                self.logging.level
            );
        }
        if self.island.name.trim().is_empty() {
            bail!("Island name cannot be empty");
        }
        Ok(())
    }
}

/// Splits `HOST:PORT`, accepting bracketed IPv6 hosts.
fn split_bind_address(bind: &str) -> Result<(String, u16)> {
    let (host, port) = bind
        .rsplit_once(':')
        .with_context(|| format!("Invalid bind address {bind}: expected HOST:PORT"))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("Invalid port in bind address {bind}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("Invalid bind address {bind}: missing host");
    }
    Ok((host.to_string(), port))
}
