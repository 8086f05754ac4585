//! # Socket Engine
//!
//! A self-contained RFC 6455 WebSocket server for the Cartographica island
//! backend. The engine performs the HTTP upgrade, decodes and encodes frames,
//! reassembles fragmented messages, answers pings and runs the close
//! handshake. Applications plug in through the [`Handler`] trait (or the
//! closure-based [`Callbacks`]) and talk back through a [`Context`].
//!
//! ## Architecture
//!
//! * [`frame`], [`close`], [`handshake`] and [`assembler`] are pure codecs
//!   with no I/O.
//! * [`session::Session`] combines them into the per-connection protocol
//!   state machine.
//! * [`WebSocketServer`] runs a single-task event loop over a Tokio listener
//!   and invokes the handler for every event, one at a time.
//!
//! ## Example
//!
//! ```no_run
//! use socket_engine::{Callbacks, EngineConfig, WebSocketServer};
//!
//! # async fn serve() -> Result<(), socket_engine::ServerError> {
//! let echo = Callbacks::new().on_message(|ctx, id, _opcode, payload| {
//!     ctx.send(id, payload.to_vec());
//! });
//! let server = WebSocketServer::bind(EngineConfig::default(), echo)?;
//! server.run().await
//! # }
//! ```
//!
//! Compression extensions, TLS and client-side connections are out of scope.

pub mod assembler;
pub mod callbacks;
pub mod close;
pub mod config;
mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
mod registry;
pub mod server;
pub mod session;
pub mod validate;

pub use assembler::Message;
pub use callbacks::{Callbacks, Context, Handler, OpenInfo, Outgoing};
pub use close::{CloseCode, CloseFrame};
pub use config::EngineConfig;
pub use connection::ConnectionId;
pub use error::{FrameError, HandshakeError, ServerError};
pub use frame::Opcode;
pub use server::{ShutdownHandle, WebSocketServer};
pub use session::ConnectionState;
