//! Application callbacks and the context they run with.
//!
//! Every callback runs on the event loop task with a [`Context`] that borrows
//! the connection registry. Sending from a callback only queues bytes; the
//! loop writes them once the callback returns, in the order they were
//! queued.

use crate::close::{CloseCode, CloseFrame};
use crate::connection::ConnectionId;
use crate::frame::{self, Opcode};
use crate::registry::{Registry, Teardown};
use crate::session::ConnectionState;
use std::net::SocketAddr;

/// Details of a connection that just completed its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenInfo {
    /// Request target of the upgrade, e.g. `/island`.
    pub path: String,
    /// Negotiated subprotocol.
    pub protocol: Option<String>,
    pub peer_addr: SocketAddr,
}

/// A data message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Binary(Vec<u8>),
}

impl Outgoing {
    fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    fn encode(&self) -> Vec<u8> {
        frame::encode(self.payload(), self.opcode(), true)
    }
}

impl From<String> for Outgoing {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Outgoing {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Outgoing {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Outgoing {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

/// Access to the server from inside a callback.
pub struct Context<'a> {
    registry: &'a mut Registry,
}

impl<'a> Context<'a> {
    pub(crate) fn new(registry: &'a mut Registry) -> Self {
        Self { registry }
    }

    /// Queues a message for one connection. Returns false if the connection
    /// is unknown, no longer open, or backlogged with unsent output.
    pub fn send(&mut self, id: ConnectionId, message: impl Into<Outgoing>) -> bool {
        let message = message.into();
        match self.registry.get_mut(id) {
            Some(connection) => connection.session.send(message.opcode(), message.payload()),
            None => false,
        }
    }

    /// Queues a message for every open connection except `exclude`. The frame
    /// is encoded once. Backlogged connections are skipped. Returns the
    /// number of recipients.
    pub fn broadcast(&mut self, message: impl Into<Outgoing>, exclude: Option<ConnectionId>) -> usize {
        let encoded = message.into().encode();
        let mut recipients = 0;
        for connection in self.registry.connections_mut() {
            if Some(connection.id()) != exclude && connection.session.send_encoded(&encoded) {
                recipients += 1;
            }
        }
        recipients
    }

    /// Starts a server-initiated close. The close frame is written, the socket
    /// shut down and `on_close` fires with this code and reason once the
    /// current callback returns. The peer's acknowledgement is not awaited.
    pub fn close(&mut self, id: ConnectionId, code: CloseCode, reason: &str) {
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };
        let close = CloseFrame::new(code, reason);
        let teardown = match connection.session.state() {
            ConnectionState::Open => Teardown::Report(close.clone()),
            ConnectionState::AwaitingHandshake => Teardown::Silent,
            ConnectionState::Closing | ConnectionState::Closed => return,
        };
        connection.session.close(&close);
        self.registry.schedule_close(id, teardown);
    }

    /// Connections currently held, including those mid-handshake.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Ids of open connections, in ascending order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.registry.open_ids()
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.registry.get(id).is_some_and(|c| c.session.is_open())
    }

    pub fn protocol(&self, id: ConnectionId) -> Option<&str> {
        self.registry.get(id).and_then(|c| c.session.protocol())
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.registry.get(id).map(|c| c.peer_addr())
    }
}

/// Application hooks invoked by the event loop.
///
/// All methods default to doing nothing. `on_close` fires exactly once for
/// every connection that reached `on_open`, and never for one that did not.
#[allow(unused_variables)]
pub trait Handler: Send + 'static {
    fn on_open(&mut self, ctx: &mut Context<'_>, id: ConnectionId, info: &OpenInfo) {}

    /// A complete text or binary message. Text payloads are valid UTF-8.
    fn on_message(&mut self, ctx: &mut Context<'_>, id: ConnectionId, opcode: Opcode, payload: &[u8]) {}

    /// The pong reply has already been queued when this runs.
    fn on_ping(&mut self, ctx: &mut Context<'_>, id: ConnectionId, payload: &[u8]) {}

    fn on_pong(&mut self, ctx: &mut Context<'_>, id: ConnectionId, payload: &[u8]) {}

    /// `code` and `reason` are `None` when the transport dropped without a
    /// close frame.
    fn on_close(&mut self, ctx: &mut Context<'_>, id: ConnectionId, code: Option<CloseCode>, reason: Option<&str>) {}

    /// A protocol or payload violation. `on_close` follows.
    fn on_error(&mut self, ctx: &mut Context<'_>, id: ConnectionId, message: &str) {}

    /// Fires once per elapsed tick interval.
    fn on_tick(&mut self, ctx: &mut Context<'_>) {}
}

type OpenFn = Box<dyn FnMut(&mut Context<'_>, ConnectionId, &OpenInfo) + Send>;
type MessageFn = Box<dyn FnMut(&mut Context<'_>, ConnectionId, Opcode, &[u8]) + Send>;
type PayloadFn = Box<dyn FnMut(&mut Context<'_>, ConnectionId, &[u8]) + Send>;
type CloseFn = Box<dyn FnMut(&mut Context<'_>, ConnectionId, Option<CloseCode>, Option<&str>) + Send>;
type ErrorFn = Box<dyn FnMut(&mut Context<'_>, ConnectionId, &str) + Send>;
type TickFn = Box<dyn FnMut(&mut Context<'_>) + Send>;

/// A [`Handler`] assembled from closures. Unset callbacks are no-ops.
///
/// ```
/// use socket_engine::Callbacks;
///
/// let callbacks = Callbacks::new().on_message(|ctx, id, _opcode, payload| {
///     ctx.send(id, payload.to_vec());
/// });
/// # drop(callbacks);
/// ```
#[derive(Default)]
pub struct Callbacks {
    open: Option<OpenFn>,
    message: Option<MessageFn>,
    ping: Option<PayloadFn>,
    pong: Option<PayloadFn>,
    close: Option<CloseFn>,
    error: Option<ErrorFn>,
    tick: Option<TickFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl FnMut(&mut Context<'_>, ConnectionId, &OpenInfo) + Send + 'static) -> Self {
        self.open = Some(Box::new(f));
        self
    }

    pub fn on_message(
        mut self,
        f: impl FnMut(&mut Context<'_>, ConnectionId, Opcode, &[u8]) + Send + 'static,
    ) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn on_ping(mut self, f: impl FnMut(&mut Context<'_>, ConnectionId, &[u8]) + Send + 'static) -> Self {
        self.ping = Some(Box::new(f));
        self
    }

    pub fn on_pong(mut self, f: impl FnMut(&mut Context<'_>, ConnectionId, &[u8]) + Send + 'static) -> Self {
        self.pong = Some(Box::new(f));
        self
    }

    pub fn on_close(
        mut self,
        f: impl FnMut(&mut Context<'_>, ConnectionId, Option<CloseCode>, Option<&str>) + Send + 'static,
    ) -> Self {
        self.close = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&mut Context<'_>, ConnectionId, &str) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_tick(mut self, f: impl FnMut(&mut Context<'_>) + Send + 'static) -> Self {
        self.tick = Some(Box::new(f));
        self
    }
}

impl Handler for Callbacks {
    fn on_open(&mut self, ctx: &mut Context<'_>, id: ConnectionId, info: &OpenInfo) {
        if let Some(f) = self.open.as_mut() {
            f(ctx, id, info);
        }
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, id: ConnectionId, opcode: Opcode, payload: &[u8]) {
        if let Some(f) = self.message.as_mut() {
            f(ctx, id, opcode, payload);
        }
    }

    fn on_ping(&mut self, ctx: &mut Context<'_>, id: ConnectionId, payload: &[u8]) {
        if let Some(f) = self.ping.as_mut() {
            f(ctx, id, payload);
        }
    }

    fn on_pong(&mut self, ctx: &mut Context<'_>, id: ConnectionId, payload: &[u8]) {
        if let Some(f) = self.pong.as_mut() {
            f(ctx, id, payload);
        }
    }

    fn on_close(&mut self, ctx: &mut Context<'_>, id: ConnectionId, code: Option<CloseCode>, reason: Option<&str>) {
        if let Some(f) = self.close.as_mut() {
            f(ctx, id, code, reason);
        }
    }

    fn on_error(&mut self, ctx: &mut Context<'_>, id: ConnectionId, message: &str) {
        if let Some(f) = self.error.as_mut() {
            f(ctx, id, message);
        }
    }

    fn on_tick(&mut self, ctx: &mut Context<'_>) {
        if let Some(f) = self.tick.as_mut() {
            f(ctx);
        }
    }
}
