//! Event types for the Herald wire protocol.
//!
//! An [`Event`] is what a connection receives. System events are emitted by
//! the broker itself; their type names are reserved and can never be
//! published.

use crate::client_id::ClientId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event types owned by the broker.
pub const RESERVED_EVENT_TYPES: [&str; 3] = ["registered", "lastEvent", "online-presence"];

/// Check whether an event type is reserved for system use.
#[must_use]
pub fn is_reserved(event_type: &str) -> bool {
    RESERVED_EVENT_TYPES.contains(&event_type)
}

/// System event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    /// Greeting carrying the connection's client id.
    Registered,
    /// Cached channel state replayed to a new subscriber.
    LastEvent,
    /// Full presence membership.
    OnlinePresence,
}

impl SystemEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SystemEvent::Registered => RESERVED_EVENT_TYPES[0],
            SystemEvent::LastEvent => RESERVED_EVENT_TYPES[1],
            SystemEvent::OnlinePresence => RESERVED_EVENT_TYPES[2],
        }
    }
}

impl TryFrom<&str> for SystemEvent {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "registered" => Ok(SystemEvent::Registered),
            "lastEvent" => Ok(SystemEvent::LastEvent),
            "online-presence" => Ok(SystemEvent::OnlinePresence),
            _ => Err("Not a system event"),
        }
    }
}

/// An event delivered to a connection.
///
/// Serializes to the `data:` line of an SSE frame. `channel_name` is `null`
/// for events that are not tied to a channel (greeting and presence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Channel the event belongs to, if any.
    pub channel_name: Option<String>,
    /// Event type, also used as the SSE `event:` field.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload, always transmitted as a string.
    pub payload: String,
}

impl Event {
    /// Create a `registered` greeting for a client.
    #[must_use]
    pub fn registered(client_id: &ClientId) -> Self {
        let mut body = serde_json::Map::new();
        body.insert("clientId".to_string(), client_id.to_json());
        Event {
            channel_name: None,
            event_type: SystemEvent::Registered.as_str().to_string(),
            payload: Value::Object(body).to_string(),
        }
    }

    /// Create a `lastEvent` replay carrying a channel's cached value verbatim.
    #[must_use]
    pub fn last_event(channel: impl Into<String>, cached: impl Into<String>) -> Self {
        Event {
            channel_name: Some(channel.into()),
            event_type: SystemEvent::LastEvent.as_str().to_string(),
            payload: cached.into(),
        }
    }

    /// Create an `online-presence` event listing every present client.
    #[must_use]
    pub fn online_presence(members: &[ClientId]) -> Self {
        let ids = members.iter().map(ClientId::to_json).collect();
        Event {
            channel_name: None,
            event_type: SystemEvent::OnlinePresence.as_str().to_string(),
            payload: Value::Array(ids).to_string(),
        }
    }

    /// Create a publisher event on a channel.
    #[must_use]
    pub fn publish(
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Event {
            channel_name: Some(channel.into()),
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }

    /// The system event this is, if its type is reserved.
    #[must_use]
    pub fn system_event(&self) -> Option<SystemEvent> {
        SystemEvent::try_from(self.event_type.as_str()).ok()
    }
}

/// Serialize the value cached as a channel's last event after a publish.
#[must_use]
pub fn cached_event(event_type: &str, payload: &str) -> String {
    format!(
        r#"{{"type":{},"payload":{}}}"#,
        Value::from(event_type),
        Value::from(payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_event_types() {
        assert!(is_reserved("registered"));
        assert!(is_reserved("lastEvent"));
        assert!(is_reserved("online-presence"));
        assert!(!is_reserved("lastevent"));
        assert!(!is_reserved("update"));
    }

    #[test]
    fn test_system_event_names() {
        for name in RESERVED_EVENT_TYPES {
            let event = SystemEvent::try_from(name).unwrap();
            assert_eq!(event.as_str(), name);
        }
        assert!(SystemEvent::try_from("headline").is_err());
    }

    #[test]
    fn test_registered_payload() {
        let named = Event::registered(&ClientId::from("u1"));
        assert_eq!(named.payload, r#"{"clientId":"u1"}"#);
        assert_eq!(named.channel_name, None);
        assert_eq!(named.system_event(), Some(SystemEvent::Registered));

        let assigned = Event::registered(&ClientId::from(3));
        assert_eq!(assigned.payload, r#"{"clientId":3}"#);
    }

    #[test]
    fn test_online_presence_payload() {
        let event = Event::online_presence(&[ClientId::from(1), ClientId::from("u1")]);
        assert_eq!(event.payload, r#"[1,"u1"]"#);
        assert_eq!(event.event_type, "online-presence");
    }

    #[test]
    fn test_data_line_shape() {
        let event = Event::online_presence(&[]);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"channelName":null,"type":"online-presence","payload":"[]"}"#
        );
    }

    #[test]
    fn test_cached_event_escapes() {
        let cached = cached_event("quote", "say \"hi\"");
        let parsed: Value = serde_json::from_str(&cached).unwrap();
        assert_eq!(parsed["payload"], "say \"hi\"");
    }

    #[test]
    fn test_cached_event() {
        assert_eq!(
            cached_event("headline", "Market up"),
            r#"{"type":"headline","payload":"Market up"}"#
        );
    }
}
