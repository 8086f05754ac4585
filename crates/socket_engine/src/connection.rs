//! Socket side of a connection: non-blocking reads and bounded writes.

use crate::session::{ConnectionState, Session};
use socket2::SockRef;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Identifier handed to callbacks. Assigned in accept order and never reused.
pub type ConnectionId = u64;

/// Size of the scratch buffer each readable socket is drained into.
pub(crate) const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Attempts made by [`Connection::flush`] before giving up on a stalled peer.
const WRITE_RETRY_LIMIT: usize = 5;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(2);

pub(crate) enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Eof,
    Failed(io::Error),
}

pub(crate) struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    accepted_at: Instant,
    pub(crate) session: Session,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, stream: TcpStream, peer_addr: SocketAddr, session: Session) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            accepted_at: Instant::now(),
            session,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// True while the upgrade request is still incomplete after `limit`.
    pub(crate) fn handshake_overdue(&self, now: Instant, limit: Duration) -> bool {
        self.session.state() == ConnectionState::AwaitingHandshake
            && now.saturating_duration_since(self.accepted_at) >= limit
    }

    /// Reads whatever the socket has without waiting.
    pub(crate) fn read_chunk(&self, chunk: &mut [u8]) -> ReadOutcome {
        match self.stream.try_read(chunk) {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    /// Resolves when the socket is readable, or writable while output is
    /// still queued. A backlogged connection only waits for writability so
    /// its peer cannot make it queue more.
    pub(crate) async fn ready(&self) -> io::Result<()> {
        let interest = if self.session.is_backlogged() {
            Interest::WRITABLE
        } else if self.session.has_pending_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.stream.ready(interest).await.map(|_| ())
    }

    /// Writes queued output until it is gone or the socket would block.
    /// Returns true once nothing is left.
    pub(crate) fn write_now(&mut self) -> io::Result<bool> {
        while self.session.has_pending_output() {
            match self.stream.try_write(self.session.pending_output()) {
                Ok(0) => return Ok(false),
                Ok(n) => self.session.consume_output(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Writes queued output, sleeping briefly between attempts when the peer
    /// is not keeping up. Gives up after a fixed number of attempts so a
    /// stalled peer cannot hold the event loop.
    pub(crate) async fn flush(&mut self) -> io::Result<bool> {
        for attempt in 0..=WRITE_RETRY_LIMIT {
            if self.write_now()? {
                return Ok(true);
            }
            if attempt < WRITE_RETRY_LIMIT {
                tokio::time::sleep(WRITE_RETRY_DELAY).await;
            }
        }
        Ok(false)
    }

    /// Sends FIN and releases the socket.
    pub(crate) fn shutdown(mut self) {
        self.session.mark_closed();
        if let Err(e) = SockRef::from(&self.stream).shutdown(Shutdown::Write) {
            tracing::trace!("shutdown of connection {} failed: {}", self.id, e);
        }
    }
}
