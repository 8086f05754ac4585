//! Command-line argument parsing
//!
//! Every flag overrides the matching value from the configuration file.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Cartographica island server
#[derive(Parser, Debug)]
#[command(author, version, about = "Cartographica island player server", long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be written
    /// there.
    #[arg(short, long, default_value = "island.toml")]
    pub config: PathBuf,

    /// Listen address, overriding `[server] host` and `port`
    ///
    /// Format: "HOST:PORT" (e.g., "127.0.0.1:8080" or "0.0.0.0:9000")
    #[arg(short, long, value_name = "ADDRESS")]
    pub bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Enable debug logging; shorthand for `--log-level debug`
    #[arg(short, long)]
    pub debug: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("island.toml"),
            bind: None,
            log_level: None,
            json_logs: false,
            debug: false,
        }
    }
}
