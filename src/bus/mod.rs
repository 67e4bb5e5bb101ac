//! Publish/subscribe bus.
//!
//! The relay only needs three things from a bus: publish bytes on a
//! subject, subscribe with a wildcard pattern, and a way to connect. The
//! [`BusTransport`] and [`BusConnector`] traits capture that; [`MemoryBus`]
//! is an in-process implementation built on bounded channels.
//!
//! # Example
//!
//! ```ignore
//! let bus = MemoryBus::new();
//! let sub = bus.subscribe("channels.*")?;
//!
//! bus.publish("channels.insertNewChannel", &bytes)?;
//!
//! while let Ok(event) = sub.recv() {
//!     match event {
//!         BusEvent::Message(m) => println!("{}: {} bytes", m.subject, m.payload.len()),
//!         BusEvent::Dropped { .. } => break,
//!     }
//! }
//! ```

mod memory;
mod subject;
mod types;

use crate::config::RetryPolicy;
use crate::error::Result;
use std::sync::Arc;

pub use memory::MemoryBus;
pub use subject::SubjectPattern;
pub use types::{
    BusConnector, BusEvent, BusSubscription, BusTransport, DropReason, Message, SubscriptionId,
};

/// Connect to the bus, retrying transient failures with backoff.
pub fn connect_with_retry(
    connector: &dyn BusConnector,
    policy: &RetryPolicy,
) -> Result<Arc<dyn BusTransport>> {
    crate::retry::retry(policy, "bus connect", |attempt| {
        tracing::debug!(attempt, "connecting to bus");
        connector.connect()
    })
}
