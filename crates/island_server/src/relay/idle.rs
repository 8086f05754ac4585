//! Inactivity tracking for the idle-connection policy.

use socket_engine::ConnectionId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last inbound activity per connection.
#[derive(Debug)]
pub struct IdleTracker {
    timeout: Option<Duration>,
    last_seen: HashMap<ConnectionId, Instant>,
}

impl IdleTracker {
    /// A timeout of 0 disables tracking.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            last_seen: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn touch(&mut self, id: ConnectionId, now: Instant) {
        if self.is_enabled() {
            self.last_seen.insert(id, now);
        }
    }

    pub fn forget(&mut self, id: ConnectionId) {
        self.last_seen.remove(&id);
    }

    /// Connections silent for longer than the timeout, in ascending id order.
    pub fn expired(&self, now: Instant) -> Vec<ConnectionId> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let mut expired: Vec<ConnectionId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > timeout)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        expired
    }

    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }
}
