//! Protocol state of a single connection, independent of its socket.
//!
//! A [`Session`] owns the receive buffer, the outbound byte queue, the
//! handshake state and the fragmentation assembler. The event loop pushes
//! received bytes in with [`Session::receive`] and pulls events out one at a
//! time with [`Session::poll_event`], so callbacks run between frames and any
//! reply they queue lands in order behind protocol replies such as pongs.

use crate::assembler::{Assembler, Message};
use crate::close::CloseFrame;
use crate::config::EngineConfig;
use crate::error::{FrameError, HandshakeError};
use crate::frame::{self, Decoded, Opcode};
use crate::handshake::{self, HandshakeOutcome};
use bytes::{Buf, BytesMut};
use std::sync::Arc;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHandshake,
    Open,
    /// A close frame or HTTP rejection is queued; nothing more is read.
    Closing,
    Closed,
}

/// Something the event loop has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The upgrade completed and the `101` response is queued.
    Opened { path: String, protocol: Option<String> },
    Message(Message),
    /// A ping arrived; the matching pong is already queued.
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// The peer sent a close frame; the echo is queued.
    PeerClosed(CloseFrame),
    /// The upgrade request was refused; the HTTP error is queued.
    Rejected(HandshakeError),
    /// The peer violated the protocol; a close frame carrying
    /// [`FrameError::close_code`] is queued.
    Failed(FrameError),
}

#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    inbound: BytesMut,
    outbound: BytesMut,
    assembler: Assembler,
    protocol: Option<String>,
    /// Set when the server is full; the request is read and then refused.
    refusal: Option<HandshakeError>,
    config: Arc<EngineConfig>,
}

impl Session {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            state: ConnectionState::AwaitingHandshake,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            assembler: Assembler::new(config.max_message_bytes),
            protocol: None,
            refusal: None,
            config,
        }
    }

    /// A session that answers its upgrade request with `503` once the
    /// request has been read in full.
    pub fn at_capacity(config: Arc<EngineConfig>) -> Self {
        Self {
            refusal: Some(HandshakeError::AtCapacity),
            ..Self::new(config)
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Negotiated subprotocol, once open.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Appends received bytes. Ignored once the session is closing.
    pub fn receive(&mut self, data: &[u8]) {
        if matches!(self.state, ConnectionState::AwaitingHandshake | ConnectionState::Open) {
            self.inbound.extend_from_slice(data);
        }
    }

    /// Processes buffered input up to the next event.
    ///
    /// Returns `None` when more bytes are needed or the session is no longer
    /// reading.
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        match self.state {
            ConnectionState::AwaitingHandshake => self.poll_handshake(),
            ConnectionState::Open => self.poll_frames(),
            ConnectionState::Closing | ConnectionState::Closed => None,
        }
    }

    fn poll_handshake(&mut self) -> Option<SessionEvent> {
        let outcome = handshake::process(&self.inbound, &self.config.subprotocols);
        if let Some(refusal) = self.refusal.clone() {
            if matches!(outcome, HandshakeOutcome::Incomplete) {
                return None;
            }
            self.reject(&refusal);
            return Some(SessionEvent::Rejected(refusal));
        }
        match outcome {
            HandshakeOutcome::Incomplete => None,
            HandshakeOutcome::Accepted { accepted, consumed } => {
                self.inbound.advance(consumed);
                self.outbound.extend_from_slice(&accepted.response());
                self.state = ConnectionState::Open;
                self.protocol = accepted.protocol.clone();
                Some(SessionEvent::Opened {
                    path: accepted.path,
                    protocol: accepted.protocol,
                })
            }
            HandshakeOutcome::Rejected(error) => {
                self.reject(&error);
                Some(SessionEvent::Rejected(error))
            }
        }
    }

    fn poll_frames(&mut self) -> Option<SessionEvent> {
        loop {
            let header = match frame::decode_header(&self.inbound, true) {
                Ok(Some(header)) => header,
                Ok(None) => return None,
                Err(e) => return Some(self.fail(e)),
            };
            if let Err(e) = self.assembler.check_incoming(header.opcode, header.payload_len) {
                return Some(self.fail(e));
            }

            let frame = match frame::decode(&self.inbound, true) {
                Ok(Decoded::Incomplete) => return None,
                Ok(Decoded::Frame { frame, consumed }) => {
                    self.inbound.advance(consumed);
                    frame
                }
                Err(e) => return Some(self.fail(e)),
            };

            match frame.opcode {
                Opcode::Ping => {
                    self.queue_frame(Opcode::Pong, &frame.payload);
                    return Some(SessionEvent::Ping(frame.payload));
                }
                Opcode::Pong => return Some(SessionEvent::Pong(frame.payload)),
                Opcode::Close => {
                    let close = match CloseFrame::parse(&frame.payload) {
                        Ok(close) => close,
                        Err(e) => return Some(self.fail(e)),
                    };
                    let echo = CloseFrame {
                        code: close.code,
                        reason: None,
                    };
                    self.outbound.extend_from_slice(&echo.encode());
                    self.enter_closing();
                    return Some(SessionEvent::PeerClosed(close));
                }
                opcode => match self.assembler.push(opcode, frame.fin, frame.payload) {
                    Ok(Some(message)) => return Some(SessionEvent::Message(message)),
                    Ok(None) => continue,
                    Err(e) => return Some(self.fail(e)),
                },
            }
        }
    }

    fn fail(&mut self, error: FrameError) -> SessionEvent {
        let close = CloseFrame::new(error.close_code(), error.to_string());
        self.outbound.extend_from_slice(&close.encode());
        self.enter_closing();
        SessionEvent::Failed(error)
    }

    fn enter_closing(&mut self) {
        self.state = ConnectionState::Closing;
        self.inbound.clear();
    }

    fn queue_frame(&mut self, opcode: Opcode, payload: &[u8]) {
        self.outbound.extend_from_slice(&frame::encode(payload, opcode, true));
    }

    /// True once unsent output has reached
    /// [`EngineConfig::max_pending_output_bytes`]. A backlogged session is not
    /// read from and refuses further sends until the peer catches up.
    pub fn is_backlogged(&self) -> bool {
        self.outbound.len() >= self.config.max_pending_output_bytes
    }

    fn accepts_output(&self) -> bool {
        self.is_open() && !self.is_backlogged()
    }

    /// Queues a data message. Returns false unless the session is open and
    /// not backlogged.
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> bool {
        if !self.accepts_output() {
            return false;
        }
        self.queue_frame(opcode, payload);
        true
    }

    /// Queues an already encoded frame, used to broadcast one encoding to
    /// many sessions.
    pub fn send_encoded(&mut self, encoded: &[u8]) -> bool {
        if !self.accepts_output() {
            return false;
        }
        self.outbound.extend_from_slice(encoded);
        true
    }

    /// Starts a server-initiated close. An open session queues the close
    /// frame; a session still in its handshake simply stops reading.
    pub fn close(&mut self, close: &CloseFrame) {
        match self.state {
            ConnectionState::Open => {
                self.outbound.extend_from_slice(&close.encode());
                self.enter_closing();
            }
            ConnectionState::AwaitingHandshake => self.enter_closing(),
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }

    /// Refuses the upgrade with the HTTP response for `error`.
    pub fn reject(&mut self, error: &HandshakeError) {
        if self.state == ConnectionState::AwaitingHandshake {
            self.outbound.extend_from_slice(&error.response());
            self.enter_closing();
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.inbound.clear();
        self.outbound.clear();
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Bytes waiting to be written to the socket.
    pub fn pending_output(&self) -> &[u8] {
        &self.outbound
    }

    /// Drops the first `n` pending bytes after a successful write.
    pub fn consume_output(&mut self, n: usize) {
        self.outbound.advance(n.min(self.outbound.len()));
    }

    /// Takes every pending byte, leaving the queue empty.
    #[cfg(test)]
    pub(crate) fn take_output(&mut self) -> Vec<u8> {
        self.outbound.split().to_vec()
    }
}
