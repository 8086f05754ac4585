//! Engine configuration types and defaults.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};

/// Default cap on a reassembled message (8 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// Default tick interval in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 100;

/// Default high-water mark for unsent output per connection (16 MiB).
pub const DEFAULT_MAX_PENDING_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// Default time a client has to complete its upgrade request.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Configuration for a [`WebSocketServer`](crate::WebSocketServer).
///
/// Deserialises from the `[server]` table of a host's TOML file; missing
/// fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Host name or IP address to listen on
    pub host: String,

    /// TCP port; 0 picks an ephemeral port
    pub port: u16,

    /// Listen backlog handed to the kernel
    pub backlog: i32,

    /// Largest message accepted after reassembly, in bytes
    pub max_message_bytes: usize,

    /// Interval between `on_tick` invocations, in milliseconds
    pub tick_ms: u64,

    /// Subprotocols offered during the handshake
    pub subprotocols: Vec<String>,

    /// Connections (handshaking or open) admitted at once
    pub max_connections: usize,

    /// Unsent output at which a connection stops being read and further
    /// sends to it are refused
    pub max_pending_output_bytes: usize,

    /// Time allowed between accept and a complete upgrade request, in
    /// milliseconds; 0 waits forever
    pub handshake_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            backlog: 128,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            tick_ms: DEFAULT_TICK_MS,
            subprotocols: Vec::new(),
            max_connections: 1000,
            max_pending_output_bytes: DEFAULT_MAX_PENDING_OUTPUT_BYTES,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Resolves `host:port` to the first matching socket address.
    pub fn bind_address(&self) -> Result<SocketAddr, ServerError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ServerError::Config(format!("cannot resolve {}:{}: {e}", self.host, self.port)))?
            .next()
            .ok_or_else(|| ServerError::Config(format!("{}:{} resolved to no address", self.host, self.port)))
    }

    /// Checks the values the event loop relies on.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.tick_ms == 0 {
            return Err(ServerError::Config("tick_ms must be greater than zero".into()));
        }
        if self.max_message_bytes == 0 {
            return Err(ServerError::Config("max_message_bytes must be greater than zero".into()));
        }
        if self.backlog <= 0 {
            return Err(ServerError::Config("backlog must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be greater than zero".into()));
        }
        if self.max_pending_output_bytes == 0 {
            return Err(ServerError::Config("max_pending_output_bytes must be greater than zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_message_bytes, 8 * 1024 * 1024);
        assert_eq!(config.tick_ms, 100);
        assert!(config.subprotocols.is_empty());
        assert_eq!(config.max_pending_output_bytes, 16 * 1024 * 1024);
        assert_eq!(config.handshake_timeout_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bind_address_resolves_ip() {
        let config = EngineConfig {
            host: "127.0.0.1".into(),
            port: 9001,
            ..Default::default()
        };
        assert_eq!(config.bind_address().unwrap(), "127.0.0.1:9001".parse().unwrap());
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let config = EngineConfig {
            tick_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_output_limit() {
        let config = EngineConfig {
            max_pending_output_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
