//! Channel registry.
//!
//! Maps channel names to [`Channel`] state. Channels are created lazily and
//! are never deleted.

use crate::broker::BrokerError;
use crate::channel::{Channel, ChannelId, PLACEHOLDER_EVENT};
use crate::handle::{ConnectionHandle, ConnectionId};
use herald_protocol::ClientId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// All channels known to a broker.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelId, Channel>,
    max_channels: usize,
}

impl ChannelRegistry {
    /// Create a registry holding at most `max_channels` channels.
    #[must_use]
    pub fn new(max_channels: usize) -> Self {
        Self {
            channels: HashMap::new(),
            max_channels,
        }
    }

    /// Get a channel, creating it with the placeholder value if absent.
    ///
    /// # Errors
    ///
    /// Returns `MaxChannelsReached` if a new channel would exceed the limit.
    pub fn get_or_create(&mut self, channel_name: &str) -> Result<&mut Channel, BrokerError> {
        self.get_or_insert_with(channel_name, PLACEHOLDER_EVENT)
    }

    /// Overwrite a channel's cached last event, creating the channel if absent.
    ///
    /// # Errors
    ///
    /// Returns `MaxChannelsReached` if a new channel would exceed the limit.
    pub fn record_event(
        &mut self,
        channel_name: &str,
        serialized: impl Into<String>,
    ) -> Result<&mut Channel, BrokerError> {
        let serialized = serialized.into();
        if !self.channels.contains_key(channel_name) {
            return self.get_or_insert_with(channel_name, serialized);
        }
        let channel = self.get_or_create(channel_name)?;
        channel.set_last_event(serialized);
        Ok(channel)
    }

    /// Subscribe a client's connection to a channel, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns `MaxChannelsReached` if a new channel would exceed the limit.
    pub fn subscribe(
        &mut self,
        channel_name: &str,
        client_id: &ClientId,
        handle: Arc<ConnectionHandle>,
    ) -> Result<&Channel, BrokerError> {
        let channel = self.get_or_create(channel_name)?;
        channel.subscribe(client_id.clone(), handle);
        Ok(channel)
    }

    /// Unsubscribe a client's connection from a channel.
    ///
    /// Absent channels and client entries are tolerated. Returns `true` if
    /// the connection was removed.
    pub fn unsubscribe(
        &mut self,
        channel_name: &str,
        client_id: &ClientId,
        connection_id: ConnectionId,
    ) -> bool {
        self.channels
            .get_mut(channel_name)
            .is_some_and(|channel| channel.unsubscribe(client_id, connection_id))
    }

    /// Read a channel's cached last event.
    ///
    /// # Errors
    ///
    /// Returns `ChannelNotFound` if the channel was never created.
    pub fn last_event(&self, channel_name: &str) -> Result<&str, BrokerError> {
        self.channels
            .get(channel_name)
            .map(Channel::last_event)
            .ok_or_else(|| BrokerError::ChannelNotFound(channel_name.to_string()))
    }

    /// Get a channel.
    #[must_use]
    pub fn get(&self, channel_name: &str) -> Option<&Channel> {
        self.channels.get(channel_name)
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn contains(&self, channel_name: &str) -> bool {
        self.channels.contains_key(channel_name)
    }

    /// Check whether `count` more channels can be created.
    #[must_use]
    pub fn has_room_for(&self, count: usize) -> bool {
        self.channels.len().saturating_add(count) <= self.max_channels
    }

    /// Get the number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Total number of (channel, connection) subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.channels.values().map(Channel::connection_count).sum()
    }

    fn get_or_insert_with(
        &mut self,
        channel_name: &str,
        initial: impl Into<String>,
    ) -> Result<&mut Channel, BrokerError> {
        if !self.channels.contains_key(channel_name) {
            if !self.has_room_for(1) {
                return Err(BrokerError::MaxChannelsReached);
            }
            debug!(channel = %channel_name, "Creating new channel");
            self.channels.insert(
                channel_name.to_string(),
                Channel::new(channel_name, initial),
            );
        }
        self.channels
            .get_mut(channel_name)
            .ok_or_else(|| BrokerError::ChannelNotFound(channel_name.to_string()))
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}
