//! The event loop.
//!
//! A single task owns the listener and every connection. Each iteration
//! waits until a connection is readable (or writable with output queued), a
//! client is waiting to be accepted, the next tick is due, or shutdown is
//! requested. It then reads the woken sockets, dispatches events to the
//! [`Handler`] one at a time, fires `on_tick` when due, reaps closed
//! connections and writes queued output.

use crate::callbacks::{Context, Handler, OpenInfo};
use crate::close::{CloseCode, CloseFrame};
use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionId, ReadOutcome, READ_CHUNK_BYTES};
use crate::error::ServerError;
use crate::registry::{Registry, Teardown};
use crate::session::{ConnectionState, Session, SessionEvent};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Reads taken from one socket per wake before other connections get a turn.
const MAX_READS_PER_WAKE: usize = 16;

/// Requests a running server to stop.
///
/// On shutdown every open connection receives a `1001 Going Away` close frame
/// and `on_close`, then [`WebSocketServer::run`] returns.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // No receiver only means the server already stopped.
        let _ = self.sender.send(());
    }
}

enum Wake {
    Ready(Vec<(ConnectionId, io::Result<()>)>),
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Tick,
    Shutdown,
}

/// A WebSocket server driving a [`Handler`].
pub struct WebSocketServer<H: Handler> {
    config: Arc<EngineConfig>,
    listener: TcpListener,
    handler: H,
    registry: Registry,
    shutdown_sender: broadcast::Sender<()>,
    shutdown_receiver: broadcast::Receiver<()>,
}

impl<H: Handler> WebSocketServer<H> {
    /// Validates `config` and binds the listening socket.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    /// * `config` - Listen address, limits and tick interval
    /// * `handler` - Receives every callback from the event loop
    ///
    /// # Errors
    /// Returns [`ServerError::Config`] for invalid settings or an address
    /// that does not resolve, and [`ServerError::Network`] when the socket
    /// cannot be created, bound or put into listening mode.
    pub fn bind(config: EngineConfig, handler: H) -> Result<Self, ServerError> {
        config.validate()?;
        let address = config.bind_address()?;

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR: {}", e);
        }
        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind to {address} failed: {e}")))?;
        socket
            .listen(config.backlog)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;

        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        Ok(Self {
            config: Arc::new(config),
            listener,
            handler,
            registry: Registry::new(),
            shutdown_sender,
            shutdown_receiver,
        })
    }

    /// The bound address, useful when the configured port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.shutdown_sender.clone(),
        }
    }

    /// Runs the event loop until shutdown is requested.
    ///
    /// Individual connection failures are handled inside the loop and never
    /// end it.
    ///
    /// # Returns
    /// `Ok(())` after a requested shutdown, once every open connection has
    /// been sent `1001 Going Away` and reported through `on_close`.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!("🚀 WebSocket server listening on {}", self.local_addr()?);
        info!(
            "🕒 Tick every {}ms, messages up to {} bytes, at most {} connections",
            self.config.tick_ms, self.config.max_message_bytes, self.config.max_connections
        );

        let tick = Duration::from_millis(self.config.tick_ms);
        let mut next_tick = Instant::now() + tick;
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];

        loop {
            let wake = {
                let mut ready: FuturesUnordered<_> = self
                    .registry
                    .connections()
                    .map(|connection| async move { (connection.id(), connection.ready().await) })
                    .collect();

                tokio::select! {
                    Some(first) = ready.next() => {
                        let mut woken = vec![first];
                        while let Some(Some(next)) = ready.next().now_or_never() {
                            woken.push(next);
                        }
                        Wake::Ready(woken)
                    }
                    accepted = self.listener.accept() => Wake::Accepted(accepted),
                    _ = sleep_until(next_tick) => Wake::Tick,
                    _ = self.shutdown_receiver.recv() => Wake::Shutdown,
                }
            };

            match wake {
                Wake::Ready(woken) => {
                    for (id, result) in woken {
                        match result {
                            Ok(()) => self.read_connection(id, &mut chunk),
                            Err(e) => self.transport_closed(id, &e.to_string(), true),
                        }
                    }
                }
                Wake::Accepted(accepted) => {
                    let mut admitted = Vec::new();
                    let mut next = Some(accepted);
                    while let Some(result) = next.take() {
                        match result {
                            Ok((stream, peer_addr)) => admitted.push(self.admit(stream, peer_addr)),
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                                break;
                            }
                        }
                        next = self.listener.accept().now_or_never();
                    }
                    for id in admitted {
                        self.read_connection(id, &mut chunk);
                    }
                }
                Wake::Tick => {}
                Wake::Shutdown => {
                    info!("🛑 Shutdown requested, closing {} connection(s)", self.registry.len());
                    self.close_all().await;
                    info!("✅ WebSocket server stopped");
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now >= next_tick {
                self.expire_handshakes(now);
                let mut ctx = Context::new(&mut self.registry);
                self.handler.on_tick(&mut ctx);
                while next_tick <= now {
                    next_tick += tick;
                }
            }

            self.reap().await;
            self.flush_pending();
            self.reap().await;
        }
    }

    fn admit(&mut self, stream: TcpStream, peer_addr: SocketAddr) -> ConnectionId {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        let id = self.registry.allocate_id();
        let session = if self.registry.len() >= self.config.max_connections {
            warn!("🚫 Connection limit of {} reached, refusing {}", self.config.max_connections, peer_addr);
            Session::at_capacity(self.config.clone())
        } else {
            Session::new(self.config.clone())
        };
        debug!("Accepted connection {} from {}", id, peer_addr);
        self.registry.insert(Connection::new(id, stream, peer_addr, session));
        id
    }

    /// Drains what the socket has buffered, dispatching events after every
    /// chunk.
    fn read_connection(&mut self, id: ConnectionId, chunk: &mut [u8]) {
        for _ in 0..MAX_READS_PER_WAKE {
            let Some(connection) = self.registry.get(id) else {
                return;
            };
            if !matches!(
                connection.session.state(),
                ConnectionState::AwaitingHandshake | ConnectionState::Open
            ) || connection.session.is_backlogged()
            {
                return;
            }
            match connection.read_chunk(chunk) {
                ReadOutcome::Data(n) => {
                    if let Some(connection) = self.registry.get_mut(id) {
                        connection.session.receive(&chunk[..n]);
                    }
                    self.dispatch(id);
                }
                ReadOutcome::WouldBlock => return,
                ReadOutcome::Eof => {
                    self.transport_closed(id, "peer closed the socket", false);
                    return;
                }
                ReadOutcome::Failed(e) => {
                    self.transport_closed(id, &e.to_string(), true);
                    return;
                }
            }
        }
    }

    /// Hands every buffered event of one connection to the handler, in order.
    fn dispatch(&mut self, id: ConnectionId) {
        loop {
            let Some(connection) = self.registry.get_mut(id) else {
                return;
            };
            let Some(event) = connection.session.poll_event() else {
                return;
            };
            let peer_addr = connection.peer_addr();

            match event {
                SessionEvent::Opened { path, protocol } => {
                    info!("👋 Connection {} opened from {} on {}", id, peer_addr, path);
                    let info = OpenInfo {
                        path,
                        protocol,
                        peer_addr,
                    };
                    let mut ctx = Context::new(&mut self.registry);
                    self.handler.on_open(&mut ctx, id, &info);
                }
                SessionEvent::Message(message) => {
                    let mut ctx = Context::new(&mut self.registry);
                    self.handler.on_message(&mut ctx, id, message.opcode, &message.payload);
                }
                SessionEvent::Ping(payload) => {
                    let mut ctx = Context::new(&mut self.registry);
                    self.handler.on_ping(&mut ctx, id, &payload);
                }
                SessionEvent::Pong(payload) => {
                    let mut ctx = Context::new(&mut self.registry);
                    self.handler.on_pong(&mut ctx, id, &payload);
                }
                SessionEvent::PeerClosed(close) => {
                    debug!("Connection {} sent close {:?}", id, close.code);
                    self.registry.schedule_close(id, Teardown::Report(close));
                }
                SessionEvent::Rejected(e) => {
                    debug!("Rejected upgrade from {}: {} ({})", peer_addr, e, e.status());
                    self.registry.schedule_close(id, Teardown::Silent);
                }
                SessionEvent::Failed(e) => {
                    let message = e.to_string();
                    warn!("Connection {} protocol error: {}", id, message);
                    let mut ctx = Context::new(&mut self.registry);
                    self.handler.on_error(&mut ctx, id, &message);
                    self.registry
                        .schedule_close(id, Teardown::Report(CloseFrame::new(e.close_code(), message)));
                }
            }
        }
    }

    /// Silently drops connections whose upgrade request is overdue so idle
    /// sockets cannot hold connection slots.
    fn expire_handshakes(&mut self, now: Instant) {
        if self.config.handshake_timeout_ms == 0 {
            return;
        }
        let limit = Duration::from_millis(self.config.handshake_timeout_ms);
        let overdue: Vec<ConnectionId> = self
            .registry
            .connections()
            .filter(|connection| connection.handshake_overdue(now, limit))
            .map(Connection::id)
            .collect();
        for id in overdue {
            if let Some(connection) = self.registry.get_mut(id) {
                debug!("⏱️ Connection {} from {} did not finish its handshake", id, connection.peer_addr());
                connection.session.close(&CloseFrame::default());
            }
            self.registry.schedule_close(id, Teardown::Silent);
        }
    }

    /// The peer went away without a close frame. After a clean end of stream
    /// an empty close frame is still attempted; after a socket error nothing
    /// more is written.
    fn transport_closed(&mut self, id: ConnectionId, detail: &str, socket_failed: bool) {
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };
        let teardown = match connection.session.state() {
            ConnectionState::Open => Teardown::Report(CloseFrame::default()),
            ConnectionState::AwaitingHandshake => Teardown::Silent,
            ConnectionState::Closing | ConnectionState::Closed => return,
        };
        debug!("Connection {} dropped: {}", id, detail);
        if socket_failed {
            connection.session.mark_closed();
        } else {
            connection.session.close(&CloseFrame::default());
        }
        self.registry.schedule_close(id, teardown);
    }

    /// Writes queued output without waiting on slow peers.
    fn flush_pending(&mut self) {
        let mut failed = Vec::new();
        for connection in self.registry.connections_mut() {
            if connection.session.has_pending_output() {
                if let Err(e) = connection.write_now() {
                    failed.push((connection.id(), e));
                }
            }
        }
        for (id, e) in failed {
            self.transport_closed(id, &e.to_string(), true);
        }
    }

    /// Flushes, shuts down and forgets every connection queued for closing.
    async fn reap(&mut self) {
        while let Some((id, teardown)) = self.registry.next_closing() {
            let Some(mut connection) = self.registry.remove(id) else {
                continue;
            };
            match connection.flush().await {
                Ok(true) => {}
                Ok(false) => debug!("Connection {} closed with unsent output", id),
                Err(e) => debug!("Final write to connection {} failed: {}", id, e),
            }
            connection.shutdown();

            if let Teardown::Report(close) = teardown {
                info!("👋 Connection {} closed ({:?})", id, close.code.map(CloseCode::as_u16));
                let mut ctx = Context::new(&mut self.registry);
                self.handler.on_close(&mut ctx, id, close.code, close.reason.as_deref());
            }
        }
    }

    async fn close_all(&mut self) {
        for id in self.registry.ids() {
            Context::new(&mut self.registry).close(id, CloseCode::GOING_AWAY, "server shutting down");
        }
        self.reap().await;
    }
}
