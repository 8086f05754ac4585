//! JSON envelopes exchanged with island players.
//!
//! Every text message is an envelope of the form
//!
//! ```json
//! { "namespace": "chat", "event": "say", "data": { "text": "land ho" } }
//! ```
//!
//! Routing is a pure function of the sender, the text and the clock so it can
//! be tested without sockets.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use socket_engine::ConnectionId;

/// A namespaced event with a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub namespace: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(namespace: &str, event: &str, data: Value) -> Self {
        Self {
            namespace: namespace.to_string(),
            event: event.to_string(),
            data,
        }
    }

    /// `system:welcome`, sent to a player right after the upgrade.
    pub fn welcome(id: ConnectionId, island: &str) -> Self {
        Self::new("system", "welcome", json!({ "id": id, "island": island }))
    }

    /// `system:error` with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("system", "error", json!({ "message": message.into() }))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Where the answer to an incoming envelope goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Back to the sender only.
    Reply(Envelope),
    /// To every open connection except the sender.
    Broadcast(Envelope),
}

/// Decides the response to a text message from `from`.
pub fn route(from: ConnectionId, text: &str, timestamp_ms: u64) -> Route {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => return Route::Reply(Envelope::error(format!("invalid envelope: {e}"))),
    };

    match (envelope.namespace.as_str(), envelope.event.as_str()) {
        ("system", "ping") => Route::Reply(Envelope::new("system", "pong", json!({ "timestamp": timestamp_ms }))),
        ("chat", "say") => match envelope.data.get("text").and_then(Value::as_str) {
            Some(said) => Route::Broadcast(Envelope::new("chat", "message", json!({ "from": from, "text": said }))),
            None => Route::Reply(Envelope::error("chat:say requires a string text field")),
        },
        (namespace, event) => Route::Reply(Envelope::error(format!("unknown event {namespace}:{event}"))),
    }
}

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
