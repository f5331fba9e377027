//! Codec for encoding and decoding Herald events.
//!
//! This module provides the Server-Sent Events text framing. Each event is
//! an `event:` line, a `data:` line with the JSON-encoded [`Event`], and a
//! blank line.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::event::Event;

/// Bytes written once at the start of every stream.
pub const STREAM_PREAMBLE: &[u8] = b"\n";

/// SSE comment frame used to keep idle streams alive through proxies.
pub const KEEP_ALIVE: &[u8] = b": keep-alive\n\n";

const EVENT_FIELD: &str = "event: ";
const DATA_FIELD: &str = "data: ";
const FRAME_TERMINATOR: &[u8] = b"\n\n";

/// Protocol errors that can occur during encoding, decoding or validation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event type cannot be carried on an SSE `event:` line.
    #[error("Invalid event type: {0:?}")]
    InvalidEventType(String),

    /// Event type is reserved for the broker.
    #[error("Event type \"{0}\" is reserved, can't fire!")]
    ReservedEventType(String),

    /// Publish request event missing a required field.
    #[error("Malformed event: {0}")]
    MalformedEvent(&'static str),

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: missing terminator")]
    Incomplete,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Check that an event type fits on a single SSE field line.
///
/// # Errors
///
/// Returns an error if the type is empty or contains a line break.
pub fn validate_event_type(event_type: &str) -> Result<(), ProtocolError> {
    if event_type.is_empty() || event_type.contains(['\n', '\r']) {
        return Err(ProtocolError::InvalidEventType(event_type.to_string()));
    }
    Ok(())
}

/// Encode an event to bytes.
///
/// The encoded format is:
/// - `event: <type>\n`
/// - `data: <json>\n`
/// - `\n`
///
/// # Errors
///
/// Returns an error if the event type is invalid or serialization fails.
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the event type is invalid or serialization fails.
pub fn encode_into(event: &Event, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    validate_event_type(&event.event_type)?;
    let data = serde_json::to_string(event)?;

    buf.reserve(EVENT_FIELD.len() + event.event_type.len() + DATA_FIELD.len() + data.len() + 3);
    buf.put_slice(EVENT_FIELD.as_bytes());
    buf.put_slice(event.event_type.as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(DATA_FIELD.as_bytes());
    buf.put_slice(data.as_bytes());
    buf.put_slice(FRAME_TERMINATOR);

    Ok(())
}

/// Decode a single event frame.
///
/// # Errors
///
/// Returns an error if the frame is incomplete, a comment, or invalid.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
    let end = find_terminator(data).ok_or(ProtocolError::Incomplete)?;
    let text = std::str::from_utf8(&data[..end])?;
    parse_frame(text)?.ok_or_else(|| ProtocolError::Invalid("frame carries no event".into()))
}

/// Try to decode the next event from a stream buffer, advancing it.
///
/// Leading blank lines and comment frames (keep-alives) are consumed and
/// skipped. Returns `Ok(None)` if no complete event frame is buffered.
///
/// # Errors
///
/// Returns an error if a complete frame is invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Event>, ProtocolError> {
    loop {
        let leading = buf.iter().take_while(|b| **b == b'\n').count();
        buf.advance(leading);

        let Some(end) = find_terminator(buf) else {
            return Ok(None);
        };

        let frame = buf.split_to(end + FRAME_TERMINATOR.len());
        let text = std::str::from_utf8(&frame[..end])?;
        if let Some(event) = parse_frame(text)? {
            return Ok(Some(event));
        }
    }
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(FRAME_TERMINATOR.len())
        .position(|w| w == FRAME_TERMINATOR)
}

/// Parse the lines of one frame. Returns `None` for comment-only frames.
fn parse_frame(text: &str) -> Result<Option<Event>, ProtocolError> {
    let mut event_type = None;
    let mut data = None;

    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        } else if let Some(value) = line.strip_prefix(EVENT_FIELD) {
            event_type = Some(value);
        } else if let Some(value) = line.strip_prefix(DATA_FIELD) {
            data = Some(value);
        } else if !line.is_empty() {
            return Err(ProtocolError::Invalid(format!("unexpected line: {line}")));
        }
    }

    match (event_type, data) {
        (None, None) => Ok(None),
        (Some(event_type), Some(data)) => {
            let event: Event = serde_json::from_str(data)?;
            if event.event_type != event_type {
                return Err(ProtocolError::Invalid(format!(
                    "event field {event_type:?} does not match data type {:?}",
                    event.event_type
                )));
            }
            Ok(Some(event))
        }
        (None, Some(_)) => Err(ProtocolError::Invalid("missing event field".into())),
        (Some(_), None) => Err(ProtocolError::Invalid("missing data field".into())),
    }
}

/// Codec for streaming event encoding/decoding.
#[derive(Debug, Default)]
pub struct EventCodec {
    buffer: BytesMut,
}

impl EventCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode an event to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, event: &Event) -> Result<Bytes, ProtocolError> {
        encode(event)
    }

    /// Append received stream bytes and return every complete event.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffered frame is invalid.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Event>, ProtocolError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(event) = decode_from(&mut self.buffer)? {
            events.push(event);
        }
        Ok(events)
    }

    /// Number of buffered bytes not yet forming a complete frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
