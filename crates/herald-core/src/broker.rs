//! The broker: Herald's owned registry object.
//!
//! A [`Broker`] holds the channel registry and the presence tracker behind a
//! single mutex. Channel subscriber maps and presence reference the same
//! connection handles, so every mutation of either happens under that lock.

use crate::handle::{ConnectionHandle, FanOut};
use crate::presence::PresenceTracker;
use crate::registry::ChannelRegistry;
use herald_protocol::{ClientId, ProtocolError};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Publishers may not emit system event types.
    #[error("Event type \"{0}\" is reserved, can't fire!")]
    ReservedEventType(String),

    /// Channel not found.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Subscribe request named no channel.
    #[error("At least one channel is required")]
    NoChannels,

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Maximum channels reached.
    #[error("Maximum channels reached")]
    MaxChannelsReached,

    /// Wire encoding error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum number of channels. Unbounded unless set.
    pub max_channels: usize,
    /// Maximum channels a single connection may subscribe to.
    pub max_subscriptions_per_connection: usize,
    /// Frames queued per connection before it is dropped as a slow consumer.
    pub connection_buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_channels: usize::MAX,
            max_subscriptions_per_connection: 100,
            connection_buffer: 256,
        }
    }
}

/// State guarded by the broker lock.
#[derive(Debug)]
pub(crate) struct BrokerState {
    pub(crate) channels: ChannelRegistry,
    pub(crate) presence: PresenceTracker,
}

impl BrokerState {
    /// Close a connection and remove it from every channel and presence.
    ///
    /// Returns `false` if the connection was already closed.
    pub(crate) fn disconnect(&mut self, handle: &Arc<ConnectionHandle>) -> bool {
        if !handle.close() {
            return false;
        }
        debug!(connection = handle.id(), client = %handle.client_id(), "Connection closed");
        let fan_out = self.detach(handle);
        self.evict(fan_out.failed);
        true
    }

    /// Drop connections whose writes failed, including any that fail while
    /// the resulting presence changes are broadcast.
    ///
    /// Returns the number of connections evicted.
    pub(crate) fn evict(&mut self, failed: Vec<Arc<ConnectionHandle>>) -> usize {
        let mut pending = failed;
        let mut evicted = 0;
        while let Some(handle) = pending.pop() {
            if !handle.close() {
                continue;
            }
            warn!(
                connection = handle.id(),
                client = %handle.client_id(),
                "Dropping unresponsive connection"
            );
            evicted += 1;
            pending.extend(self.detach(&handle).failed);
        }
        evicted
    }

    /// Remove a handle from each channel it joined, then from presence.
    fn detach(&mut self, handle: &Arc<ConnectionHandle>) -> FanOut {
        for channel in handle.channels() {
            self.channels
                .unsubscribe(channel, handle.client_id(), handle.id());
        }
        self.presence
            .remove_connection(handle.client_id(), handle.id())
            .unwrap_or_default()
    }
}

/// The central registry of channels and presence.
pub struct Broker {
    state: Mutex<BrokerState>,
    /// Counter for server-assigned client ids.
    next_client_id: AtomicU64,
    config: BrokerConfig,
}

impl Broker {
    /// Create a new broker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a new broker with custom configuration.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        info!("Creating broker with config: {:?}", config);
        Self {
            state: Mutex::new(BrokerState {
                channels: ChannelRegistry::new(config.max_channels),
                presence: PresenceTracker::new(),
            }),
            next_client_id: AtomicU64::new(0),
            config,
        }
    }

    /// Get the broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Assign a fresh client id. The first assigned id is `1`.
    #[must_use]
    pub fn next_client_id(&self) -> ClientId {
        ClientId::Assigned(self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Close a connection and clean up after it.
    ///
    /// Safe to call any number of times; cleanup runs once per handle.
    /// Returns `true` for the call that performed the cleanup.
    pub fn disconnect(&self, handle: &Arc<ConnectionHandle>) -> bool {
        self.lock().disconnect(handle)
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let state = self.lock();
        BrokerStats {
            channel_count: state.channels.len(),
            client_count: state.presence.count(),
            connection_count: state.presence.connection_count(),
            subscription_count: state.channels.subscription_count(),
        }
    }

    /// Get the present client ids.
    #[must_use]
    pub fn members(&self) -> Vec<ClientId> {
        self.lock().presence.members()
    }

    /// Check if a client has an open connection.
    #[must_use]
    pub fn is_present(&self, client_id: &ClientId) -> bool {
        self.lock().presence.is_present(client_id)
    }

    /// Read a channel's cached last event.
    ///
    /// # Errors
    ///
    /// Returns `ChannelNotFound` if the channel was never created.
    pub fn last_event(&self, channel_name: &str) -> Result<String, BrokerError> {
        self.lock().channels.last_event(channel_name).map(str::to_string)
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_name: &str) -> bool {
        self.lock().channels.contains(channel_name)
    }

    /// Get the number of clients subscribed to a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.lock()
            .channels
            .get(channel_name)
            .map_or(0, |c| c.client_count())
    }

    /// Get the number of connections a client holds on a channel.
    #[must_use]
    pub fn connection_count(&self, channel_name: &str, client_id: &ClientId) -> usize {
        self.lock()
            .channels
            .get(channel_name)
            .map_or(0, |c| c.connections_of(client_id))
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.lock().channels.channel_names()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Number of channels.
    pub channel_count: usize,
    /// Number of present clients.
    pub client_count: usize,
    /// Number of open connections.
    pub connection_count: usize,
    /// Total number of channel subscriptions across connections.
    pub subscription_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_count_from_one() {
        let broker = Broker::new();
        assert_eq!(broker.next_client_id(), ClientId::Assigned(1));
        assert_eq!(broker.next_client_id(), ClientId::Assigned(2));
    }

    #[test]
    fn test_disconnect_removes_everywhere_once() {
        let broker = Broker::new();
        let client = ClientId::from("u1");
        let (handle, _rx) =
            ConnectionHandle::new(client.clone(), vec!["news".into(), "sports".into()], 8);

        {
            let mut state = broker.lock();
            for channel in handle.channels() {
                state
                    .channels
                    .subscribe(channel, &client, Arc::clone(&handle))
                    .unwrap();
            }
            state.presence.add_connection(client.clone(), Arc::clone(&handle));
        }
        assert_eq!(broker.subscriber_count("news"), 1);
        assert!(broker.is_present(&client));

        assert!(broker.disconnect(&handle));
        assert!(!broker.disconnect(&handle));

        assert_eq!(broker.subscriber_count("news"), 0);
        assert_eq!(broker.subscriber_count("sports"), 0);
        assert!(!broker.is_present(&client));
        assert!(broker.channel_exists("news"));
    }

    #[test]
    fn test_disconnect_tolerates_partial_state() {
        let broker = Broker::new();
        let client = ClientId::from("u1");
        let (handle, _rx) = ConnectionHandle::new(client.clone(), vec!["news".into()], 8);

        // Joined presence but never made it into the channel
        broker
            .lock()
            .presence
            .add_connection(client.clone(), Arc::clone(&handle));

        assert!(broker.disconnect(&handle));
        assert!(!broker.is_present(&client));
        assert!(!broker.channel_exists("news"));
    }

    #[test]
    fn test_evict_cascades_through_presence_broadcast() {
        let broker = Broker::new();
        let (a, rx_a) = ConnectionHandle::new(ClientId::from("A"), vec![], 8);
        let (b, rx_b) = ConnectionHandle::new(ClientId::from("B"), vec![], 8);
        let (c, _rx_c) = ConnectionHandle::new(ClientId::from("C"), vec![], 8);

        let mut state = broker.lock();
        state.presence.add_connection(ClientId::from("A"), Arc::clone(&a));
        state.presence.add_connection(ClientId::from("B"), Arc::clone(&b));
        state.presence.add_connection(ClientId::from("C"), Arc::clone(&c));
        drop(rx_a);
        drop(rx_b);

        // Evicting A broadcasts to B, whose write fails too
        assert_eq!(state.evict(vec![Arc::clone(&a)]), 2);
        assert_eq!(state.presence.members(), vec![ClientId::from("C")]);
        assert!(a.is_closed() && b.is_closed() && !c.is_closed());
    }

    #[test]
    fn test_broker_stats() {
        let broker = Broker::new();
        let (tab_one, _rx1) = ConnectionHandle::new(ClientId::from("u1"), vec!["a".into()], 8);
        let (tab_two, _rx2) = ConnectionHandle::new(ClientId::from("u1"), vec!["a".into()], 8);

        {
            let mut state = broker.lock();
            for handle in [&tab_one, &tab_two] {
                state
                    .channels
                    .subscribe("a", handle.client_id(), Arc::clone(handle))
                    .unwrap();
                state
                    .presence
                    .add_connection(handle.client_id().clone(), Arc::clone(handle));
            }
            state.channels.record_event("b", "seed").unwrap();
        }

        assert_eq!(
            broker.stats(),
            BrokerStats {
                channel_count: 2,
                client_count: 1,
                connection_count: 2,
                subscription_count: 2,
            }
        );
    }
}
