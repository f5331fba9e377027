//! Channel abstraction for Herald.
//!
//! Channels are named topics holding the most recently published event and
//! the connections subscribed to them, grouped by client.

use crate::handle::{ConnectionHandle, ConnectionId, HandleSet};
use herald_protocol::ClientId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Cached value of a channel that nobody has published to yet.
pub const PLACEHOLDER_EVENT: &str = "{}";

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// Names are case-sensitive and used as given, whatever their length or
/// content; only the empty name is refused.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    Ok(())
}

/// A channel with its cached last event and subscribers.
#[derive(Debug)]
pub struct Channel {
    /// Channel name.
    name: ChannelId,
    /// Serialized most recent event, or the placeholder.
    last_event: String,
    /// Subscribed handles per client. A client entry is never empty.
    subscribers: HashMap<ClientId, HandleSet>,
}

impl Channel {
    /// Create a new channel with an initial cached value.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>, last_event: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_event: last_event.into(),
            subscribers: HashMap::new(),
        }
    }

    /// Create a new channel caching the placeholder value.
    #[must_use]
    pub fn with_placeholder(name: impl Into<ChannelId>) -> Self {
        Self::new(name, PLACEHOLDER_EVENT)
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the cached last event.
    #[must_use]
    pub fn last_event(&self) -> &str {
        &self.last_event
    }

    /// Replace the cached last event.
    pub fn set_last_event(&mut self, last_event: impl Into<String>) {
        self.last_event = last_event.into();
    }

    /// Subscribe a connection on behalf of a client.
    ///
    /// Returns `true` if this is the client's first connection on the channel.
    pub fn subscribe(&mut self, client_id: ClientId, handle: Arc<ConnectionHandle>) -> bool {
        let connection_id = handle.id();
        let handles = self.subscribers.entry(client_id.clone()).or_default();
        let first = handles.is_empty();
        handles.insert(connection_id, handle);
        debug!(
            channel = %self.name,
            client = %client_id,
            connection = connection_id,
            "Connection subscribed"
        );
        first
    }

    /// Unsubscribe a connection.
    ///
    /// The client entry is removed once its last connection is gone. Returns
    /// `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, client_id: &ClientId, connection_id: ConnectionId) -> bool {
        let Some(handles) = self.subscribers.get_mut(client_id) else {
            return false;
        };
        let removed = handles.remove(&connection_id).is_some();
        if handles.is_empty() {
            self.subscribers.remove(client_id);
            debug!(channel = %self.name, client = %client_id, "Client left channel");
        }
        removed
    }

    /// Check if a client has at least one subscribed connection.
    #[must_use]
    pub fn is_subscribed(&self, client_id: &ClientId) -> bool {
        self.subscribers.contains_key(client_id)
    }

    /// Get the number of subscribed clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Get the number of subscribed connections across all clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.subscribers.values().map(HashMap::len).sum()
    }

    /// Get the connection count for one client.
    #[must_use]
    pub fn connections_of(&self, client_id: &ClientId) -> usize {
        self.subscribers.get(client_id).map_or(0, HashMap::len)
    }

    /// Snapshot of every subscribed handle.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.subscribers
            .values()
            .flat_map(|handles| handles.values().cloned())
            .collect()
    }

    /// Check if the channel has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
