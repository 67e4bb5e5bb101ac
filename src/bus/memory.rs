//! In-process bus.

use crate::error::{RelayError, Result};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::subject::SubjectPattern;
use super::types::{
    BusConnector, BusEvent, BusSubscription, BusTransport, DropReason, Message, SubscriptionId,
};

/// Default max buffered messages per subscription.
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Internal subscription state.
struct Subscription {
    pattern: SubjectPattern,
    sender: Sender<BusEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    fn try_send(&self, event: BusEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Bus delivering messages between threads of one process.
///
/// Every subscription has a bounded buffer; a subscriber that falls behind
/// is dropped and told so with [`BusEvent::Dropped`]. Closing the bus
/// disconnects every subscription.
pub struct MemoryBus {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    buffer_size: usize,
    closed: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Close the bus: drop every subscription and refuse further traffic.
    ///
    /// Messages already buffered stay readable; receivers then see a
    /// disconnected channel.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscriptions.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl BusTransport for MemoryBus {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::Disconnected);
        }

        let message = Message {
            subject: subject.to_string(),
            payload: payload.to_vec(),
        };

        let mut to_remove = Vec::new();
        let mut delivered = 0usize;
        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.pattern.matches(subject) {
                    continue;
                }
                if sub.try_send(BusEvent::Message(message.clone())) {
                    delivered += 1;
                } else {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, pattern = %sub.pattern, "dropping slow subscriber");
                    // Might fail if the buffer is still full; the disconnect tells the rest.
                    let _ = sub.sender.try_send(BusEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }

        tracing::trace!(subject, delivered, bytes = payload.len(), "published");
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> Result<BusSubscription> {
        if self.is_closed() {
            return Err(RelayError::Disconnected);
        }

        let parsed = SubjectPattern::parse(pattern)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);

        self.subscriptions.write().insert(
            id,
            Subscription {
                pattern: parsed,
                sender,
            },
        );

        Ok(BusSubscription {
            id,
            pattern: pattern.to_string(),
            receiver,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(BusEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }
}

impl BusConnector for Arc<MemoryBus> {
    fn connect(&self) -> Result<Arc<dyn BusTransport>> {
        if self.is_closed() {
            return Err(RelayError::Disconnected);
        }
        Ok(Arc::clone(self) as Arc<dyn BusTransport>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn expect_message(sub: &BusSubscription) -> Message {
        match sub.recv_timeout(Duration::from_millis(100)).unwrap() {
            BusEvent::Message(m) => m,
            other => panic!("Expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let bus = MemoryBus::new();

        let sub = bus.subscribe("channels.*").unwrap();
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(sub.id);
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(
            sub.recv_timeout(Duration::from_millis(100)).unwrap(),
            BusEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
    }

    #[test]
    fn test_publish_to_matching() {
        let bus = MemoryBus::new();
        let all = bus.subscribe("channels.*").unwrap();
        let new_only = bus.subscribe("channels.insertNewChannel").unwrap();

        bus.publish("channels.insertUpdateChannel", b"u").unwrap();
        bus.publish("channels.insertNewChannel", b"n").unwrap();

        assert_eq!(expect_message(&all).payload, b"u");
        assert_eq!(expect_message(&all).payload, b"n");

        let m = expect_message(&new_only);
        assert_eq!(m.subject, "channels.insertNewChannel");
        assert!(new_only.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let bus = MemoryBus::with_buffer_size(2);
        let sub = bus.subscribe("channels.*").unwrap();

        for i in 0..10u8 {
            bus.publish("channels.insertNewChannel", &[i]).unwrap();
        }

        assert_eq!(bus.subscription_count(), 0);

        // The buffered messages are still readable, then the channel disconnects.
        assert_eq!(expect_message(&sub).payload, vec![0]);
        assert_eq!(expect_message(&sub).payload, vec![1]);
        assert!(sub.recv().is_err());
    }

    #[test]
    fn test_close_disconnects() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("channels.*").unwrap();
        bus.publish("channels.insertNewChannel", b"last").unwrap();

        bus.close();

        assert_eq!(expect_message(&sub).payload, b"last");
        assert!(sub.recv().is_err());
        assert!(matches!(bus.publish("channels.x", b""), Err(RelayError::Disconnected)));
        assert!(bus.connect().is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let bus = MemoryBus::new();
        assert!(matches!(bus.subscribe("a..b"), Err(RelayError::InvalidConfig(_))));
    }
}
