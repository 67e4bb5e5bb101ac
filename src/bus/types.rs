//! Bus message and subscription types.

use crate::error::Result;
use std::sync::Arc;

/// A message delivered by the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Concrete subject the message was published on.
    pub subject: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Items received on a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Message(Message),

    /// Subscription was dropped by the bus.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Receive buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive messages of one subscription.
pub struct BusSubscription {
    pub id: SubscriptionId,
    /// Pattern this subscription was registered with.
    pub pattern: String,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<BusEvent>,
}

impl BusSubscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<BusEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<BusEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// A publish/subscribe transport.
///
/// Delivery is at-least-once to every live subscription whose pattern
/// matches the subject.
pub trait BusTransport: Send + Sync {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<()>;

    fn subscribe(&self, pattern: &str) -> Result<BusSubscription>;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Establishes connections to a bus.
pub trait BusConnector {
    fn connect(&self) -> Result<Arc<dyn BusTransport>>;
}
