//! Error types for the socket engine.
//!
//! Errors are split by the layer that produces them so every failure maps to
//! exactly one user-visible outcome:
//!
//! * [`FrameError`] - wire protocol and payload violations after the upgrade.
//!   Each variant maps to a close code via [`FrameError::close_code`].
//! * [`HandshakeError`] - rejected upgrade requests. Each variant maps to an
//!   HTTP status via [`HandshakeError::status`].
//! * [`ServerError`] - failures of the listener itself.

use crate::close::CloseCode;
use thiserror::Error;

/// Violations detected while decoding frames or assembling messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("reserved bits set without a negotiated extension")]
    ReservedBitsSet,

    #[error("client frame is not masked")]
    UnmaskedFrame,

    #[error("unsupported opcode 0x{0:X}")]
    UnsupportedOpcode(u8),

    #[error("64-bit payload length has its most significant bit set")]
    InvalidLength,

    #[error("control frame must not be fragmented")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLarge(u64),

    #[error("close frame payload of a single byte")]
    CloseTooShort,

    #[error("close code {0} is not allowed on the wire")]
    InvalidCloseCode(u16),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    NestedFragment,

    #[error("message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: u64, max: usize },
}

impl FrameError {
    /// The close code sent to the peer when this error ends a connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidUtf8(_) => CloseCode::INVALID_PAYLOAD,
            Self::MessageTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            Self::UnsupportedOpcode(_) => CloseCode::UNSUPPORTED_DATA,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}

/// Reasons an HTTP upgrade request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("malformed upgrade request: {0}")]
    Malformed(String),

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("missing or invalid {0} header")]
    InvalidHeader(&'static str),

    #[error("unsupported websocket version {0:?}")]
    UnsupportedVersion(Option<String>),

    #[error("Sec-WebSocket-Key is not a base64 encoded 16-byte nonce")]
    InvalidKey,

    #[error("request header block exceeds {0} bytes")]
    TooLarge(usize),

    #[error("server is at its connection limit")]
    AtCapacity,
}

impl HandshakeError {
    /// HTTP status code answered for this rejection.
    pub fn status(&self) -> u16 {
        match self {
            Self::MethodNotAllowed(_) => 405,
            Self::UnsupportedVersion(_) => 426,
            Self::AtCapacity => 503,
            Self::Malformed(_) | Self::InvalidHeader(_) | Self::InvalidKey | Self::TooLarge(_) => 400,
        }
    }

    fn reason_phrase(&self) -> &'static str {
        match self.status() {
            405 => "Method Not Allowed",
            426 => "Upgrade Required",
            503 => "Service Unavailable",
            _ => "Bad Request",
        }
    }

    /// Complete HTTP response sent before the socket is closed.
    pub fn response(&self) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: 0\r\n",
            self.status(),
            self.reason_phrase()
        );
        match self {
            Self::UnsupportedVersion(_) => response.push_str("Sec-WebSocket-Version: 13\r\n"),
            Self::MethodNotAllowed(_) => response.push_str("Allow: GET\r\n"),
            _ => {}
        }
        response.push_str("\r\n");
        response.into_bytes()
    }
}

/// Failures of the listening server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
