//! Subscription sessions.
//!
//! A [`SubscriptionSession`] is one open event stream. Opening it greets the
//! client, replays each requested channel's cached event and joins presence.
//! Closing it, explicitly or by dropping it, removes the connection from
//! every channel and from presence exactly once.

use crate::broker::{Broker, BrokerError, BrokerState};
use crate::channel::validate_channel_name;
use crate::handle::{ConnectionHandle, ConnectionId};
use bytes::Bytes;
use herald_protocol::{codec, ClientId, Event};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Subscribe request received, not yet registered.
    Connecting,
    /// Registered and receiving events.
    Active,
    /// Closed. Terminal.
    Closed,
}

/// A request to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Channels to join, in the order their last events are replayed.
    pub channel_names: Vec<String>,
    /// Client id to use; one is assigned when absent.
    pub client_id: Option<ClientId>,
}

impl SubscribeRequest {
    /// Create a request for the given channels.
    #[must_use]
    pub fn new<I, S>(channel_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel_names: channel_names.into_iter().map(Into::into).collect(),
            client_id: None,
        }
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// One open subscription stream.
pub struct SubscriptionSession {
    broker: Arc<Broker>,
    handle: Arc<ConnectionHandle>,
    state: SessionState,
}

impl SubscriptionSession {
    /// Open a session and return it with the receiver of its frames.
    ///
    /// The receiver yields, in order: `registered`, one `lastEvent` per
    /// channel, the `online-presence` broadcast, then live events.
    ///
    /// # Errors
    ///
    /// Returns `NoChannels` for an empty request, `InvalidChannel` for an
    /// unusable name, `MaxSubscriptionsReached` for too many channels and
    /// `MaxChannelsReached` if the channels cannot be created.
    pub fn open(
        broker: Arc<Broker>,
        request: SubscribeRequest,
    ) -> Result<(Self, mpsc::Receiver<Bytes>), BrokerError> {
        let mut channel_names: Vec<String> = Vec::with_capacity(request.channel_names.len());
        for name in request.channel_names {
            if !channel_names.contains(&name) {
                channel_names.push(name);
            }
        }

        if channel_names.is_empty() {
            return Err(BrokerError::NoChannels);
        }
        for name in &channel_names {
            validate_channel_name(name).map_err(BrokerError::InvalidChannel)?;
        }
        let config = broker.config();
        if channel_names.len() > config.max_subscriptions_per_connection {
            return Err(BrokerError::MaxSubscriptionsReached);
        }

        let client_id = request
            .client_id
            .unwrap_or_else(|| broker.next_client_id());
        // Room for the greeting, every replay and the presence broadcast
        let capacity = config.connection_buffer.max(channel_names.len() + 2);
        let (handle, receiver) = ConnectionHandle::new(client_id, channel_names, capacity);

        let mut session = Self {
            broker,
            handle,
            state: SessionState::Connecting,
        };

        {
            let mut state = session.broker.lock();
            if let Err(e) = attach(&mut state, &session.handle) {
                state.disconnect(&session.handle);
                session.state = SessionState::Closed;
                return Err(e);
            }
        }

        session.state = SessionState::Active;
        debug!(
            connection = session.handle.id(),
            client = %session.handle.client_id(),
            channels = ?session.handle.channels(),
            "Session opened"
        );
        Ok((session, receiver))
    }

    /// Close the session.
    ///
    /// Returns `true` if this call performed the cleanup; `false` if the
    /// session was already closed or its connection was dropped.
    pub fn close(&mut self) -> bool {
        self.state = SessionState::Closed;
        self.broker.disconnect(&self.handle)
    }

    /// Get the current state. A session whose connection was dropped as a
    /// slow consumer reports `Closed`.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.handle.is_closed() {
            SessionState::Closed
        } else {
            self.state
        }
    }

    /// Get the client id.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        self.handle.client_id()
    }

    /// Get the connection id.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Get the joined channels.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        self.handle.channels()
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("connection_id", &self.handle.id())
            .field("client_id", self.handle.client_id())
            .field("channels", &self.handle.channels())
            .field("state", &self.state())
            .finish()
    }
}

/// Register a fresh handle: greet, subscribe with replay, join presence.
fn attach(state: &mut BrokerState, handle: &Arc<ConnectionHandle>) -> Result<(), BrokerError> {
    let new_channels = handle
        .channels()
        .iter()
        .filter(|name| !state.channels.contains(name))
        .count();
    if !state.channels.has_room_for(new_channels) {
        return Err(BrokerError::MaxChannelsReached);
    }

    let client_id = handle.client_id();
    let mut failed = Vec::new();

    let greeting = codec::encode(&Event::registered(client_id))?;
    let mut delivered = handle.write(greeting).is_ok();

    for name in handle.channels() {
        let channel = state
            .channels
            .subscribe(name, client_id, Arc::clone(handle))?;
        let replay = codec::encode(&Event::last_event(name.as_str(), channel.last_event()))?;
        delivered &= handle.write(replay).is_ok();
    }

    if !delivered {
        failed.push(Arc::clone(handle));
    }
    failed.extend(
        state
            .presence
            .add_connection(client_id.clone(), Arc::clone(handle))
            .failed,
    );
    state.evict(failed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::dispatcher::EventDispatcher;
    use herald_protocol::SystemEvent;

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(codec::decode(&frame).unwrap());
        }
        events
    }

    fn summary(events: &[Event]) -> Vec<(String, String)> {
        events
            .iter()
            .map(|e| (e.event_type.clone(), e.payload.clone()))
            .collect()
    }

    #[test]
    fn test_open_and_publish_scenario() {
        let broker = Arc::new(Broker::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&broker));

        let request = SubscribeRequest::new(["news", "sports"]).with_client_id("u1");
        let (session, mut rx) = SubscriptionSession::open(Arc::clone(&broker), request).unwrap();
        assert_eq!(session.state(), SessionState::Active);

        let events = drain(&mut rx);
        assert_eq!(
            summary(&events),
            vec![
                ("registered".to_string(), r#"{"clientId":"u1"}"#.to_string()),
                ("lastEvent".to_string(), "{}".to_string()),
                ("lastEvent".to_string(), "{}".to_string()),
                ("online-presence".to_string(), r#"["u1"]"#.to_string()),
            ]
        );
        assert_eq!(events[0].channel_name, None);
        assert_eq!(events[1].channel_name.as_deref(), Some("news"));
        assert_eq!(events[2].channel_name.as_deref(), Some("sports"));
        assert_eq!(events[3].system_event(), Some(SystemEvent::OnlinePresence));

        dispatcher.publish("news", "headline", "Market up").unwrap();
        let events = drain(&mut rx);
        assert_eq!(events, vec![Event::publish("news", "headline", "Market up")]);
        assert_eq!(broker.last_event("sports").unwrap(), "{}");
    }

    #[test]
    fn test_assigned_client_ids() {
        let broker = Arc::new(Broker::new());
        let (first, mut rx) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["a"])).unwrap();
        let (second, _rx2) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["a"])).unwrap();

        assert_eq!(first.client_id(), &ClientId::Assigned(1));
        assert_eq!(second.client_id(), &ClientId::Assigned(2));
        assert_eq!(drain(&mut rx)[0].payload, r#"{"clientId":1}"#);
    }

    #[test]
    fn test_replay_after_publish() {
        let broker = Arc::new(Broker::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&broker));
        let (_watcher, _rx) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["c"])).unwrap();

        dispatcher.publish("c", "update", "v2").unwrap();

        let (_late, mut rx) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["c"])).unwrap();
        let replay = &drain(&mut rx)[1];
        assert_eq!(replay.system_event(), Some(SystemEvent::LastEvent));
        assert_eq!(replay.payload, r#"{"type":"update","payload":"v2"}"#);
    }

    #[test]
    fn test_replay_of_seeded_channel() {
        let broker = Arc::new(Broker::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&broker));
        dispatcher.publish("c", "update", "X").unwrap();

        let (_s, mut rx) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["c"])).unwrap();
        assert_eq!(drain(&mut rx)[1].payload, "X");
    }

    #[test]
    fn test_two_tabs_same_channel() {
        let broker = Arc::new(Broker::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&broker));
        let request = SubscribeRequest::new(["news"]).with_client_id("u1");

        let (mut tab_one, _rx_one) =
            SubscriptionSession::open(Arc::clone(&broker), request.clone()).unwrap();
        let (mut tab_two, mut rx_two) =
            SubscriptionSession::open(Arc::clone(&broker), request).unwrap();
        assert_eq!(broker.subscriber_count("news"), 1);
        assert_eq!(broker.connection_count("news", &ClientId::from("u1")), 2);

        assert!(tab_one.close());
        assert!(!tab_one.close());
        assert_eq!(tab_one.state(), SessionState::Closed);
        drain(&mut rx_two);

        dispatcher.publish("news", "headline", "still here").unwrap();
        assert_eq!(drain(&mut rx_two).len(), 1);
        assert!(broker.is_present(&ClientId::from("u1")));

        assert!(tab_two.close());
        assert_eq!(broker.subscriber_count("news"), 0);
        assert!(!broker.is_present(&ClientId::from("u1")));
    }

    #[test]
    fn test_presence_across_sessions() {
        let broker = Arc::new(Broker::new());
        let (_a, mut rx_a) = SubscriptionSession::open(
            Arc::clone(&broker),
            SubscribeRequest::new(["x"]).with_client_id("A"),
        )
        .unwrap();
        let (b, mut rx_b) = SubscriptionSession::open(
            Arc::clone(&broker),
            SubscribeRequest::new(["y"]).with_client_id("B"),
        )
        .unwrap();

        let presence = |events: Vec<Event>| -> Vec<String> {
            events
                .into_iter()
                .filter(|e| e.system_event() == Some(SystemEvent::OnlinePresence))
                .map(|e| e.payload)
                .collect()
        };
        assert_eq!(presence(drain(&mut rx_a)), vec![r#"["A"]"#, r#"["A","B"]"#]);
        assert_eq!(presence(drain(&mut rx_b)), vec![r#"["A","B"]"#]);

        drop(b);
        assert_eq!(presence(drain(&mut rx_a)), vec![r#"["A"]"#]);
        assert_eq!(broker.members(), vec![ClientId::from("A")]);
    }

    #[test]
    fn test_supplied_numeric_name_is_its_own_client() {
        let broker = Arc::new(Broker::new());
        let (assigned, _rx_assigned) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["x"])).unwrap();
        let (named, mut rx_named) = SubscriptionSession::open(
            Arc::clone(&broker),
            SubscribeRequest::new(["x"]).with_client_id("1"),
        )
        .unwrap();

        assert_eq!(assigned.client_id(), &ClientId::Assigned(1));
        assert_eq!(named.client_id(), &ClientId::from("1"));
        assert_eq!(broker.subscriber_count("x"), 2);

        let events = drain(&mut rx_named);
        assert_eq!(events[0].payload, r#"{"clientId":"1"}"#);
        assert_eq!(events.last().unwrap().payload, r#"[1,"1"]"#);

        drop(assigned);
        assert!(broker.is_present(&ClientId::from("1")));
        assert!(!broker.is_present(&ClientId::Assigned(1)));
    }

    #[test]
    fn test_drop_closes_session() {
        let broker = Arc::new(Broker::new());
        let (session, _rx) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["a", "b"]))
                .unwrap();
        assert_eq!(broker.stats().subscription_count, 2);

        drop(session);
        let stats = broker.stats();
        assert_eq!(stats.subscription_count, 0);
        assert_eq!(stats.connection_count, 0);
        assert_eq!(stats.channel_count, 2);
    }

    #[test]
    fn test_duplicate_channels_joined_once() {
        let broker = Arc::new(Broker::new());
        let (session, mut rx) = SubscriptionSession::open(
            Arc::clone(&broker),
            SubscribeRequest::new(["news", "news", "sports"]),
        )
        .unwrap();

        assert_eq!(session.channels(), ["news".to_string(), "sports".to_string()]);
        assert_eq!(drain(&mut rx).len(), 4);
    }

    #[test]
    fn test_open_rejections() {
        let broker = Arc::new(Broker::with_config(BrokerConfig {
            max_channels: 2,
            max_subscriptions_per_connection: 2,
            connection_buffer: 8,
        }));

        let open = |channels: &[&str]| {
            SubscriptionSession::open(
                Arc::clone(&broker),
                SubscribeRequest::new(channels.iter().copied()),
            )
        };

        assert!(matches!(open(&[]), Err(BrokerError::NoChannels)));
        assert!(matches!(open(&["ok", ""]), Err(BrokerError::InvalidChannel(_))));
        assert!(matches!(
            open(&["a", "b", "c"]),
            Err(BrokerError::MaxSubscriptionsReached)
        ));

        let (_s, _rx) = open(&["a", "b"]).unwrap();
        assert!(matches!(open(&["a", "c"]), Err(BrokerError::MaxChannelsReached)));

        // Nothing leaked from the rejected attempts
        assert_eq!(broker.stats().connection_count, 1);
        assert!(!broker.channel_exists("c"));
    }

    #[test]
    fn test_slow_session_is_evicted() {
        let broker = Arc::new(Broker::with_config(BrokerConfig {
            connection_buffer: 3,
            ..BrokerConfig::default()
        }));
        let dispatcher = EventDispatcher::new(Arc::clone(&broker));

        let (slow, _rx_slow) =
            SubscriptionSession::open(Arc::clone(&broker), SubscribeRequest::new(["news"]))
                .unwrap();
        // registered, lastEvent and presence fill the queue
        let outcome = dispatcher.publish("news", "tick", "1").unwrap();

        assert_eq!(outcome.dropped(), 1);
        assert_eq!(slow.state(), SessionState::Closed);
        assert!(broker.members().is_empty());
    }
}
