//! # herald-protocol
//!
//! Wire definitions for the Herald event broadcaster.
//!
//! Herald speaks Server-Sent Events. Every delivered event is a two-line
//! frame terminated by a blank line:
//!
//! ```text
//! event: <type>
//! data: {"channelName":"news","type":"<type>","payload":"..."}
//!
//! ```
//!
//! ## Event Types
//!
//! - `registered` - Sent once per connection with the assigned client id
//! - `lastEvent` - Cached channel state replayed on join
//! - `online-presence` - Full list of connected client ids
//! - anything else - Publisher-defined events
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, Event};
//!
//! let event = Event::publish("news", "headline", "Market up");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod client_id;
pub mod codec;
pub mod event;
pub mod publish;

pub use client_id::ClientId;
pub use codec::{decode, encode, ProtocolError};
pub use event::{cached_event, is_reserved, Event, SystemEvent, RESERVED_EVENT_TYPES};
pub use publish::{PublishEvent, PublishRequest, ValidatedEvent};
