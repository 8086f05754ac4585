//! # Island Server
//!
//! Hosts the Cartographica island relay on the socket engine: configuration
//! loading, logging setup, signal handling and the [`relay::Relay`] handler.

pub mod config;
pub mod logging;
pub mod relay;
pub mod signals;

pub use config::{load_config, Args, Config};
pub use relay::Relay;
