//! Shared fixtures for the Herald benchmarks.

use bytes::Bytes;
use herald_core::{Broker, BrokerConfig, SubscribeRequest, SubscriptionSession};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An open session together with the receiving end of its stream.
pub type Subscriber = (SubscriptionSession, mpsc::Receiver<Bytes>);

/// Create a broker sized for benchmarking.
#[must_use]
pub fn broker() -> Arc<Broker> {
    Arc::new(Broker::with_config(BrokerConfig {
        max_channels: usize::MAX,
        max_subscriptions_per_connection: 1_000,
        connection_buffer: 1_024,
    }))
}

/// Open `count` sessions, each as a distinct client, on `channels`.
///
/// Every join broadcasts presence to every earlier session, so the queues
/// should be drained before measuring.
///
/// # Panics
///
/// Panics if a session cannot be opened.
#[must_use]
pub fn subscribers(broker: &Arc<Broker>, channels: &[&str], count: usize) -> Vec<Subscriber> {
    (0..count)
        .map(|i| {
            let request = SubscribeRequest::new(channels.iter().copied())
                .with_client_id(format!("client-{i}"));
            SubscriptionSession::open(Arc::clone(broker), request)
                .expect("failed to open bench session")
        })
        .collect()
}

/// Discard every queued frame, returning how many there were.
pub fn drain(receiver: &mut mpsc::Receiver<Bytes>) -> usize {
    let mut count = 0;
    while receiver.try_recv().is_ok() {
        count += 1;
    }
    count
}

/// Drain every subscriber's queue.
pub fn drain_all(subscribers: &mut [Subscriber]) -> usize {
    subscribers.iter_mut().map(|(_, rx)| drain(rx)).sum()
}
