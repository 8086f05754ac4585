//! Close codes and close frame payloads (RFC 6455 section 7.4).

use crate::error::FrameError;
use crate::frame::{self, Opcode, MAX_CONTROL_PAYLOAD};
use crate::validate;
use std::fmt;

/// A status code carried by a close frame.
///
/// Only codes that are legal on the wire can be constructed through
/// [`CloseCode::new`]; the associated constants cover the codes the engine
/// itself sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloseCode(u16);

impl CloseCode {
    pub const NORMAL: Self = Self(1000);
    pub const GOING_AWAY: Self = Self(1001);
    pub const PROTOCOL_ERROR: Self = Self(1002);
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    pub const INVALID_PAYLOAD: Self = Self(1007);
    pub const POLICY_VIOLATION: Self = Self(1008);
    pub const MESSAGE_TOO_BIG: Self = Self(1009);

    /// Validates a raw code against the wire ranges.
    pub fn new(code: u16) -> Result<Self, FrameError> {
        if validate::is_valid_close_code(code) {
            Ok(Self(code))
        } else {
            Err(FrameError::InvalidCloseCode(code))
        }
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded close frame payload: an optional code and an optional reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: Option<CloseCode>,
    pub reason: Option<String>,
}

impl CloseFrame {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code: Some(code),
            reason: (!reason.is_empty()).then_some(reason),
        }
    }

    /// Parses the payload of a close frame.
    ///
    /// An empty payload carries nothing, a single byte is invalid, and two or
    /// more bytes hold a big-endian code followed by a UTF-8 reason.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        match payload {
            [] => Ok(Self::default()),
            [_] => Err(FrameError::CloseTooShort),
            [hi, lo, rest @ ..] => {
                let code = CloseCode::new(u16::from_be_bytes([*hi, *lo]))?;
                let reason = if rest.is_empty() {
                    None
                } else {
                    Some(validate::utf8(rest, "close reason")?.to_owned())
                };
                Ok(Self {
                    code: Some(code),
                    reason,
                })
            }
        }
    }

    /// Serialises the payload. The reason is cut so the whole payload stays
    /// within the 125-byte control frame limit.
    pub fn to_payload(&self) -> Vec<u8> {
        let Some(code) = self.code else {
            return Vec::new();
        };
        let reason = self
            .reason
            .as_deref()
            .map(|r| validate::truncate_utf8(r, MAX_CONTROL_PAYLOAD - 2))
            .unwrap_or_default();
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.as_u16().to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        payload
    }

    /// Complete unmasked close frame ready to write.
    pub fn encode(&self) -> Vec<u8> {
        frame::encode(&self.to_payload(), Opcode::Close, true)
    }
}
