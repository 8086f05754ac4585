//! Ownership of every live connection, keyed by id.

use crate::close::CloseFrame;
use crate::connection::{Connection, ConnectionId};
use std::collections::{BTreeMap, VecDeque};

/// How a connection leaves the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Never reached `on_open`; no callbacks fire.
    Silent,
    /// Fires `on_close` with the code and reason. Both are `None` when the
    /// transport failed without a close handshake.
    Report(CloseFrame),
}

/// Connections owned by the event loop.
///
/// Only the loop task touches the registry, so callbacks running inside it
/// can borrow it mutably without locks. Connections that finished are queued
/// in `closing` and reaped once the current dispatch returns.
#[derive(Default)]
pub(crate) struct Registry {
    connections: BTreeMap<ConnectionId, Connection>,
    closing: VecDeque<(ConnectionId, Teardown)>,
    next_id: ConnectionId,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub(crate) fn allocate_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, connection: Connection) {
        self.connections.insert(connection.id(), connection);
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub(crate) fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub(crate) fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Ids of connections that completed the handshake and are not closing.
    pub(crate) fn open_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.session.is_open())
            .map(Connection::id)
            .collect()
    }

    /// Queues `id` for reaping. The first teardown recorded for an id wins.
    pub(crate) fn schedule_close(&mut self, id: ConnectionId, teardown: Teardown) {
        if self.connections.contains_key(&id) && !self.closing.iter().any(|(queued, _)| *queued == id) {
            self.closing.push_back((id, teardown));
        }
    }

    pub(crate) fn next_closing(&mut self) -> Option<(ConnectionId, Teardown)> {
        self.closing.pop_front()
    }
}
