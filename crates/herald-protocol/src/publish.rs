//! Publish request bodies.
//!
//! Publishers submit a batch of events as JSON:
//!
//! ```json
//! { "events": [ { "channelName": "news", "type": "headline", "payload": "Market up" } ] }
//! ```

use crate::codec::{validate_event_type, ProtocolError};
use crate::event::is_reserved;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A batch of events to publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Events in publish order. Missing or `null` means an empty batch.
    #[serde(default)]
    pub events: Option<Vec<PublishEvent>>,
}

/// One event as submitted by a publisher, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEvent {
    /// Target channel.
    #[serde(default)]
    pub channel_name: Option<String>,
    /// Event type.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    /// Payload of any JSON type; coerced to a string on validation.
    #[serde(default)]
    pub payload: Option<Value>,
}

/// An event that passed validation and may be handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent {
    /// Target channel.
    pub channel_name: String,
    /// Event type, not reserved.
    pub event_type: String,
    /// Payload in string form.
    pub payload: String,
}

impl PublishRequest {
    /// Create a request from a list of events.
    #[must_use]
    pub fn new(events: Vec<PublishEvent>) -> Self {
        Self {
            events: Some(events),
        }
    }

    /// Validate the whole batch.
    ///
    /// Every event type is checked against the reserved set first, then every
    /// event is checked for its required fields. Any failure rejects the
    /// whole batch.
    ///
    /// # Errors
    ///
    /// Returns `ReservedEventType` or `MalformedEvent` for the first offending
    /// event.
    pub fn validate(&self) -> Result<Vec<ValidatedEvent>, ProtocolError> {
        let events = self.events.as_deref().unwrap_or_default();

        if let Some(reserved) = events
            .iter()
            .filter_map(|e| e.event_type.as_deref())
            .find(|t| is_reserved(t))
        {
            return Err(ProtocolError::ReservedEventType(reserved.to_string()));
        }

        events.iter().map(PublishEvent::validate).collect()
    }
}

impl PublishEvent {
    /// Create a publish event.
    #[must_use]
    pub fn new(
        channel_name: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<Value>,
    ) -> Self {
        Self {
            channel_name: Some(channel_name.into()),
            event_type: Some(event_type.into()),
            payload: Some(payload.into()),
        }
    }

    /// Validate a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or empty, the type is reserved,
    /// or the type cannot be framed.
    pub fn validate(&self) -> Result<ValidatedEvent, ProtocolError> {
        let channel_name = self
            .channel_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(ProtocolError::MalformedEvent("'channelName' is required"))?;
        let event_type = self
            .event_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ProtocolError::MalformedEvent("'type' is required"))?;
        let payload = self
            .payload
            .as_ref()
            .and_then(payload_string)
            .ok_or(ProtocolError::MalformedEvent("'payload' is required"))?;

        if is_reserved(event_type) {
            return Err(ProtocolError::ReservedEventType(event_type.to_string()));
        }
        validate_event_type(event_type)?;

        Ok(ValidatedEvent {
            channel_name: channel_name.to_string(),
            event_type: event_type.to_string(),
            payload,
        })
    }
}

/// Coerce a payload to its string form. `null` and `""` count as missing.
fn payload_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_body() {
        let body = r#"{"events":[{"channelName":"news","type":"headline","payload":"Market up"}]}"#;
        let request: PublishRequest = serde_json::from_str(body).unwrap();

        let events = request.validate().unwrap();
        assert_eq!(
            events,
            vec![ValidatedEvent {
                channel_name: "news".into(),
                event_type: "headline".into(),
                payload: "Market up".into(),
            }]
        );
    }

    #[test]
    fn test_missing_events_is_empty_batch() {
        let request: PublishRequest = serde_json::from_str("{}").unwrap();
        assert!(request.validate().unwrap().is_empty());

        let request: PublishRequest = serde_json::from_str(r#"{"events":null}"#).unwrap();
        assert!(request.validate().unwrap().is_empty());
    }

    #[test]
    fn test_non_string_payload_is_coerced() {
        let event = PublishEvent::new("scores", "goal", json!({"home": 1}));
        assert_eq!(event.validate().unwrap().payload, r#"{"home":1}"#);

        let event = PublishEvent::new("scores", "count", 42);
        assert_eq!(event.validate().unwrap().payload, "42");
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let cases = [
            PublishEvent {
                channel_name: None,
                ..PublishEvent::new("c", "t", "p")
            },
            PublishEvent {
                event_type: Some(String::new()),
                ..PublishEvent::new("c", "t", "p")
            },
            PublishEvent {
                payload: Some(Value::Null),
                ..PublishEvent::new("c", "t", "p")
            },
            PublishEvent::new("c", "t", ""),
        ];

        for event in cases {
            assert!(matches!(
                event.validate(),
                Err(ProtocolError::MalformedEvent(_))
            ));
        }
    }

    #[test]
    fn test_reserved_checked_before_malformed() {
        let request = PublishRequest::new(vec![
            PublishEvent {
                payload: None,
                ..PublishEvent::new("c", "update", "p")
            },
            PublishEvent::new("c", "online-presence", "[]"),
        ]);

        match request.validate() {
            Err(ProtocolError::ReservedEventType(t)) => assert_eq!(t, "online-presence"),
            other => panic!("Expected ReservedEventType error, got {:?}", other),
        }
    }

    #[test]
    fn test_multiline_type_rejected() {
        let event = PublishEvent::new("c", "a\nb", "p");
        assert!(matches!(
            event.validate(),
            Err(ProtocolError::InvalidEventType(_))
        ));
    }
}
