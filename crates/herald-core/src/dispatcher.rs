//! Event dispatch.
//!
//! The [`EventDispatcher`] is the publish entry point: it updates a channel's
//! cached last event and fans the event out to every subscribed connection.

use crate::broker::{Broker, BrokerError, BrokerState};
use crate::handle::FanOut;
use herald_protocol::codec::{self, validate_event_type};
use herald_protocol::{cached_event, is_reserved, Event, ValidatedEvent};
use std::sync::Arc;
use tracing::{debug, trace};

/// What a single publish did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The channel did not exist; it was created with the payload as its
    /// cached value and nothing was delivered.
    Seeded,
    /// The event was cached and fanned out.
    Delivered {
        /// Connections the event was queued on.
        recipients: usize,
        /// Connections dropped because the write failed.
        dropped: usize,
    },
}

impl PublishOutcome {
    /// Number of connections the event reached.
    #[must_use]
    pub fn recipients(&self) -> usize {
        match self {
            Self::Seeded => 0,
            Self::Delivered { recipients, .. } => *recipients,
        }
    }

    /// Number of connections dropped during delivery.
    #[must_use]
    pub fn dropped(&self) -> usize {
        match self {
            Self::Seeded => 0,
            Self::Delivered { dropped, .. } => *dropped,
        }
    }
}

/// Publishes events through a shared [`Broker`].
#[derive(Clone)]
pub struct EventDispatcher {
    broker: Arc<Broker>,
}

impl EventDispatcher {
    /// Create a dispatcher over a broker.
    #[must_use]
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Get the broker.
    #[must_use]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Publish one event to a channel.
    ///
    /// # Errors
    ///
    /// Returns `ReservedEventType` for system event types, `InvalidChannel`
    /// for unusable channel names and `MaxChannelsReached` if the channel
    /// would have to be created past the limit.
    pub fn publish(
        &self,
        channel_name: &str,
        event_type: &str,
        payload: &str,
    ) -> Result<PublishOutcome, BrokerError> {
        ensure_publishable(channel_name, event_type)?;
        let mut state = self.broker.lock();
        publish_locked(&mut state, channel_name, event_type, payload)
    }

    /// Publish a batch of events in order.
    ///
    /// Every event is checked before any is published, so a rejected batch
    /// leaves the broker untouched. A channel created past the limit stops
    /// the batch at that event.
    ///
    /// # Errors
    ///
    /// See [`EventDispatcher::publish`].
    pub fn publish_batch(
        &self,
        events: &[ValidatedEvent],
    ) -> Result<Vec<PublishOutcome>, BrokerError> {
        for event in events {
            ensure_publishable(&event.channel_name, &event.event_type)?;
        }

        let mut state = self.broker.lock();
        events
            .iter()
            .map(|event| {
                publish_locked(
                    &mut state,
                    &event.channel_name,
                    &event.event_type,
                    &event.payload,
                )
            })
            .collect()
    }
}

fn ensure_publishable(channel_name: &str, event_type: &str) -> Result<(), BrokerError> {
    if is_reserved(event_type) {
        return Err(BrokerError::ReservedEventType(event_type.to_string()));
    }
    validate_event_type(event_type)?;
    crate::channel::validate_channel_name(channel_name).map_err(BrokerError::InvalidChannel)
}

fn publish_locked(
    state: &mut BrokerState,
    channel_name: &str,
    event_type: &str,
    payload: &str,
) -> Result<PublishOutcome, BrokerError> {
    if !state.channels.contains(channel_name) {
        state.channels.record_event(channel_name, payload)?;
        debug!(channel = %channel_name, "Seeded channel from first publish");
        return Ok(PublishOutcome::Seeded);
    }

    let frame = codec::encode(&Event::publish(channel_name, event_type, payload))?;
    let channel = state
        .channels
        .record_event(channel_name, cached_event(event_type, payload))?;
    let FanOut { delivered, failed } = FanOut::deliver(channel.handles(), &frame);

    trace!(
        channel = %channel_name,
        event_type = %event_type,
        recipients = delivered,
        "Event published"
    );

    let dropped = state.evict(failed);
    Ok(PublishOutcome::Delivered {
        recipients: delivered,
        dropped,
    })
}
