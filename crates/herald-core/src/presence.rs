//! Presence tracking for Herald.
//!
//! Presence records which clients have at least one open connection,
//! system-wide, and tells every connection whenever that set changes.

use crate::handle::{ConnectionHandle, ConnectionId, FanOut, HandleSet};
use herald_protocol::{codec, ClientId, Event};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Presence tracker across all channels.
///
/// A client id is present if and only if it holds at least one open
/// connection.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Open connections per client. A client entry is never empty.
    clients: BTreeMap<ClientId, HandleSet>,
}

impl PresenceTracker {
    /// Create a new presence tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and broadcast the membership to every connection.
    ///
    /// The broadcast happens even when the client was already present, so
    /// the new connection always learns the current membership.
    pub fn add_connection(&mut self, client_id: ClientId, handle: Arc<ConnectionHandle>) -> FanOut {
        let connections = self.clients.entry(client_id.clone()).or_default();
        if connections.is_empty() {
            debug!(client = %client_id, "Presence: client joined");
        }
        connections.insert(handle.id(), handle);
        self.broadcast()
    }

    /// Remove a connection.
    ///
    /// When it was the client's last connection the client leaves and the new
    /// membership is broadcast to the remaining connections. Returns `None`
    /// when membership did not change.
    pub fn remove_connection(
        &mut self,
        client_id: &ClientId,
        connection_id: ConnectionId,
    ) -> Option<FanOut> {
        let connections = self.clients.get_mut(client_id)?;
        connections.remove(&connection_id);
        if !connections.is_empty() {
            return None;
        }

        self.clients.remove(client_id);
        debug!(client = %client_id, "Presence: client left");
        Some(self.broadcast())
    }

    /// Get the present client ids.
    #[must_use]
    pub fn members(&self) -> Vec<ClientId> {
        self.clients.keys().cloned().collect()
    }

    /// Check if a client is present.
    #[must_use]
    pub fn is_present(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Get the number of present clients.
    #[must_use]
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Get the number of open connections across all clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.clients.values().map(|c| c.len()).sum()
    }

    /// Get the number of open connections for one client.
    #[must_use]
    pub fn connections_of(&self, client_id: &ClientId) -> usize {
        self.clients.get(client_id).map_or(0, |c| c.len())
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send the full membership to a snapshot of every connection.
    fn broadcast(&self) -> FanOut {
        let event = Event::online_presence(&self.members());
        let frame = match codec::encode(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode presence event");
                return FanOut::default();
            }
        };

        let handles: Vec<Arc<ConnectionHandle>> = self
            .clients
            .values()
            .flat_map(|c| c.values().cloned())
            .collect();
        FanOut::deliver(handles, &frame)
    }
}
