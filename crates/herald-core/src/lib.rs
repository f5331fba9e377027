//! # herald-core
//!
//! Channel registry, presence tracking and event fan-out for the Herald
//! event broadcaster.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Broker** - Owns channels and presence behind one lock
//! - **Channel** - Named topic with a cached last event and subscribers
//! - **Presence** - Which clients hold at least one open connection
//! - **Dispatcher** - Publish entry point and fan-out
//! - **Session** - Lifecycle of one subscription stream
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Broker    │────▶│  Channels   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                       ▲      │
//! ┌─────────────┐       │      ▼
//! │ Dispatcher  │───────┘  ┌─────────────┐
//! └─────────────┘          │  Presence   │
//!                          └─────────────┘
//! ```

pub mod broker;
pub mod channel;
pub mod dispatcher;
pub mod handle;
pub mod presence;
pub mod registry;
pub mod session;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerStats};
pub use channel::{validate_channel_name, Channel, ChannelId, PLACEHOLDER_EVENT};
pub use dispatcher::{EventDispatcher, PublishOutcome};
pub use handle::{ConnectionHandle, ConnectionId, DeliveryError, FanOut};
pub use presence::PresenceTracker;
pub use registry::ChannelRegistry;
pub use session::{SessionState, SubscribeRequest, SubscriptionSession};
