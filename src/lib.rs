//! # Sample Relay
//!
//! Propagates versioned sample-catalog records from an append-only record
//! store to subscribers over a publish/subscribe bus, and keeps a
//! consolidated snapshot of the latest version of every sample on the
//! subscriber side.
//!
//! ## Core Concepts
//!
//! - **Records**: sample observations keyed by a stable identity
//! - **Stored versions**: immutable, timestamped copies in the record store
//! - **Change detection**: new / changed / unchanged against the latest version
//! - **Events**: protobuf-encoded records on `channels.<kind>` subjects
//! - **Snapshot**: one entry per identity, rewritten after every event
//!
//! ## Example
//!
//! ```ignore
//! use sample_relay::*;
//!
//! let store = Arc::new(VersionStore::open_or_create(StoreConfig::default())?);
//! let bus = MemoryBus::new();
//! let topics = Topics::default();
//!
//! // Subscriber: fold every event into the snapshot
//! let consumer = Arc::new(Consumer::aggregate(
//!     &topics.aggregate(),
//!     &topics,
//!     SnapshotFile::new("snapshot.json"),
//!     SnapshotStart::Resume,
//! )?);
//! let worker = consumer.spawn(bus.subscribe(&topics.aggregate())?)?;
//!
//! // Publisher: classify, version and announce a batch
//! let events = EventPublisher::new(bus.clone(), topics, RetryPolicy::default());
//! let mut publisher = Publisher::new(store, events, UnchangedPolicy::Reannounce);
//! let summary = publisher.run(&InputBatch::load("fetch.json")?.results);
//! ```

pub mod bus;
pub mod config;
pub mod consumer;
pub mod detect;
pub mod error;
pub mod input;
pub mod publisher;
pub mod records;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod wire;

// Re-exports
pub use bus::{
    connect_with_retry, BusConnector, BusEvent, BusSubscription, BusTransport, DropReason,
    MemoryBus, Message, SubjectPattern, SubscriptionId,
};
pub use config::{RelayConfig, RetryPolicy, SnapshotStart, Topics, UnchangedPolicy};
pub use consumer::{Consumer, ConsumerStats};
pub use detect::{ChangeDetector, Classification};
pub use error::{RelayError, Result};
pub use input::InputBatch;
pub use publisher::{
    DeadLetter, EventPublisher, Publisher, RecordFailure, RecordOutcome, RunSummary, VersionWriter,
};
pub use records::{IdentityIndex, VersionLog};
pub use snapshot::{ReconcileOutcome, Reconciler, Snapshot, SnapshotFile};
pub use store::{MemoryRecordStore, RecordStore, StoreConfig, VersionStore};
pub use types::*;
pub use wire::{WireRecord, WIRE_SCHEMA_VERSION};
