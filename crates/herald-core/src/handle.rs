//! Connection handles.
//!
//! A [`ConnectionHandle`] is the write side of one open event stream. Writes
//! never block: each handle owns a bounded queue, and a write that finds the
//! queue full or the reader gone fails immediately so that one slow consumer
//! cannot stall a fan-out.

use bytes::Bytes;
use herald_protocol::ClientId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Unique identifier of one connection.
pub type ConnectionId = u64;

/// Connection ids are unique for the lifetime of the process.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handles keyed by connection id.
pub(crate) type HandleSet = HashMap<ConnectionId, Arc<ConnectionHandle>>;

/// Errors writing to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The handle was closed or its reader went away.
    #[error("Connection closed")]
    Closed,

    /// The outbound queue is full.
    #[error("Connection lagging: outbound queue full")]
    Lagging,
}

/// The write side of one streaming connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    client_id: ClientId,
    /// Channels this connection joined at subscribe time.
    channels: Vec<String>,
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    /// Create a handle and the receiver that drains it.
    ///
    /// `capacity` is the number of frames that may be queued before the
    /// connection counts as lagging.
    #[must_use]
    pub fn new(
        client_id: ClientId,
        channels: Vec<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            client_id,
            channels,
            sender: Mutex::new(Some(sender)),
            closed: AtomicBool::new(false),
        };
        (Arc::new(handle), receiver)
    }

    /// Get the connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the client this connection belongs to.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Get the channels this connection subscribed to.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Queue an encoded frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Lagging` if the queue is full and `Closed` if the handle was
    /// closed or the receiver dropped.
    pub fn write(&self, frame: Bytes) -> Result<(), DeliveryError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagging,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Close the handle, ending its stream once queued frames are drained.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sender.lock().take();
        true
    }

    /// Check if the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Result of writing one frame to a set of handles.
#[derive(Debug, Default)]
pub struct FanOut {
    /// Number of handles the frame was queued on.
    pub delivered: usize,
    /// Handles whose write failed; they must be evicted.
    pub failed: Vec<Arc<ConnectionHandle>>,
}

impl FanOut {
    /// Write `frame` to every handle. Each write is independent of the others.
    pub fn deliver(
        handles: impl IntoIterator<Item = Arc<ConnectionHandle>>,
        frame: &Bytes,
    ) -> Self {
        let mut fan_out = FanOut::default();
        for handle in handles {
            match handle.write(frame.clone()) {
                Ok(()) => fan_out.delivered += 1,
                Err(e) => {
                    debug!(
                        connection = handle.id(),
                        client = %handle.client_id(),
                        error = %e,
                        "Delivery failed"
                    );
                    fan_out.failed.push(handle);
                }
            }
        }
        fan_out
    }
}
