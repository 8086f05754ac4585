//! Reassembly of fragmented data messages.

use crate::error::FrameError;
use crate::frame::Opcode;
use crate::validate;

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// [`Opcode::Text`] or [`Opcode::Binary`].
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Message {
    /// The payload as text. Text messages are validated before delivery so
    /// this only returns `None` for binary messages.
    pub fn as_text(&self) -> Option<&str> {
        match self.opcode {
            Opcode::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Assembling { opcode: Opcode, buffer: Vec<u8> },
}

/// Per-connection fragmentation state machine.
///
/// Only data frames are pushed here; control frames may arrive between
/// fragments and are handled by the session without touching this state.
#[derive(Debug)]
pub struct Assembler {
    state: State,
    max_message_bytes: usize,
}

impl Assembler {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            state: State::Idle,
            max_message_bytes,
        }
    }

    pub fn is_assembling(&self) -> bool {
        matches!(self.state, State::Assembling { .. })
    }

    /// Bytes accumulated for the message in progress.
    pub fn buffered_len(&self) -> usize {
        match &self.state {
            State::Idle => 0,
            State::Assembling { buffer, .. } => buffer.len(),
        }
    }

    /// Rejects a frame whose declared payload would push the message past the
    /// limit, before the payload is buffered.
    pub fn check_incoming(&self, opcode: Opcode, payload_len: u64) -> Result<(), FrameError> {
        if opcode.is_control() {
            return Ok(());
        }
        let base = if opcode == Opcode::Continuation { self.buffered_len() as u64 } else { 0 };
        let size = base.saturating_add(payload_len);
        if size > self.max_message_bytes as u64 {
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_bytes,
            });
        }
        Ok(())
    }

    /// Feeds one data frame. Returns the message once its final fragment has
    /// arrived.
    ///
    /// On error the assembler is reset; the connection is expected to close.
    pub fn push(&mut self, opcode: Opcode, fin: bool, payload: Vec<u8>) -> Result<Option<Message>, FrameError> {
        debug_assert!(!opcode.is_control(), "control frames bypass the assembler");
        let result = self.advance(opcode, fin, payload);
        if result.is_err() {
            self.state = State::Idle;
        }
        result
    }

    fn advance(&mut self, opcode: Opcode, fin: bool, payload: Vec<u8>) -> Result<Option<Message>, FrameError> {
        match opcode {
            Opcode::Text | Opcode::Binary => {
                if self.is_assembling() {
                    return Err(FrameError::NestedFragment);
                }
                self.check_size(payload.len())?;
                if fin {
                    return finish(opcode, payload).map(Some);
                }
                self.state = State::Assembling { opcode, buffer: payload };
                Ok(None)
            }
            Opcode::Continuation => {
                let State::Assembling { buffer, .. } = &mut self.state else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                let size = buffer.len().saturating_add(payload.len());
                if size > self.max_message_bytes {
                    return Err(FrameError::MessageTooLarge {
                        size: size as u64,
                        max: self.max_message_bytes,
                    });
                }
                buffer.extend_from_slice(&payload);
                if !fin {
                    return Ok(None);
                }
                match std::mem::take(&mut self.state) {
                    State::Assembling { opcode, buffer } => finish(opcode, buffer).map(Some),
                    State::Idle => Ok(None),
                }
            }
            Opcode::Close | Opcode::Ping | Opcode::Pong => Ok(None),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_message_bytes {
            return Err(FrameError::MessageTooLarge {
                size: size as u64,
                max: self.max_message_bytes,
            });
        }
        Ok(())
    }
}

fn finish(opcode: Opcode, payload: Vec<u8>) -> Result<Message, FrameError> {
    if opcode == Opcode::Text {
        validate::utf8(&payload, "text message")?;
    }
    Ok(Message { opcode, payload })
}
