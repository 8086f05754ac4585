//! The island relay: the application handler hosted by the socket engine.
//!
//! Text messages are JSON envelopes routed by [`envelope::route`]. Binary
//! messages are relayed untouched to every other player. Connections that
//! stay silent longer than the configured idle timeout are closed with
//! `1001 Going Away` from `on_tick`.

pub mod envelope;
pub mod idle;

pub use envelope::{route, Envelope, Route};
pub use idle::IdleTracker;

use crate::config::IslandSettings;
use socket_engine::{CloseCode, ConnectionId, Context, Handler, Opcode, OpenInfo};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct Relay {
    island: String,
    idle: IdleTracker,
}

impl Relay {
    pub fn new(settings: &IslandSettings) -> Self {
        Self {
            island: settings.name.clone(),
            idle: IdleTracker::new(settings.idle_timeout_ms),
        }
    }

    fn deliver(&self, ctx: &mut Context<'_>, from: ConnectionId, route: Route) {
        match route {
            Route::Reply(envelope) => send_envelope(ctx, from, &envelope),
            Route::Broadcast(envelope) => {
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize {}:{}: {}", envelope.namespace, envelope.event, e);
                        return;
                    }
                };
                let recipients = ctx.broadcast(text, Some(from));
                debug!(
                    "📨 {}:{} from player {} reached {} player(s)",
                    envelope.namespace, envelope.event, from, recipients
                );
            }
        }
    }
}

fn send_envelope(ctx: &mut Context<'_>, to: ConnectionId, envelope: &Envelope) {
    match envelope.to_json() {
        Ok(text) => {
            if !ctx.send(to, text) {
                debug!("Dropped {}:{} for player {}", envelope.namespace, envelope.event, to);
            }
        }
        Err(e) => error!("Failed to serialize {}:{}: {}", envelope.namespace, envelope.event, e),
    }
}

impl Handler for Relay {
    fn on_open(&mut self, ctx: &mut Context<'_>, id: ConnectionId, info: &OpenInfo) {
        info!(
            "🏝️ Player {} landed on {} from {} ({} online)",
            id,
            self.island,
            info.peer_addr,
            ctx.connection_ids().len()
        );
        self.idle.touch(id, Instant::now());
        send_envelope(ctx, id, &Envelope::welcome(id, &self.island));
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, id: ConnectionId, opcode: Opcode, payload: &[u8]) {
        self.idle.touch(id, Instant::now());
        match opcode {
            Opcode::Text => {
                // Text payloads arrive validated as UTF-8.
                let text = String::from_utf8_lossy(payload);
                let route = route(id, &text, envelope::current_timestamp_ms());
                self.deliver(ctx, id, route);
            }
            _ => {
                let recipients = ctx.broadcast(payload, Some(id));
                debug!("📦 Relayed {} bytes from player {} to {} player(s)", payload.len(), id, recipients);
            }
        }
    }

    fn on_ping(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, _payload: &[u8]) {
        self.idle.touch(id, Instant::now());
    }

    fn on_pong(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, _payload: &[u8]) {
        self.idle.touch(id, Instant::now());
    }

    fn on_close(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, code: Option<CloseCode>, reason: Option<&str>) {
        self.idle.forget(id);
        info!(
            "👋 Player {} left {} (code {:?}, reason {:?})",
            id,
            self.island,
            code.map(CloseCode::as_u16),
            reason.unwrap_or_default()
        );
    }

    fn on_error(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, message: &str) {
        warn!("⚠️ Player {} broke protocol: {}", id, message);
    }

    fn on_tick(&mut self, ctx: &mut Context<'_>) {
        for id in self.idle.expired(Instant::now()) {
            info!("💤 Closing idle player {}", id);
            ctx.close(id, CloseCode::GOING_AWAY, "idle timeout");
            self.idle.forget(id);
        }
    }
}
