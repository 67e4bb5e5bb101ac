//! Event consumer.
//!
//! Decodes every message delivered on a subscription. A consumer whose
//! pattern covers every event kind is an aggregate consumer and folds the
//! records into the snapshot; any other consumer only observes.

use crate::bus::{BusEvent, BusSubscription, Message, SubjectPattern};
use crate::config::{SnapshotStart, Topics};
use crate::error::{RelayError, Result};
use crate::snapshot::{ReconcileOutcome, Reconciler, SnapshotFile};
use crate::wire;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Counters for one consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub reconciled: u64,
    /// Messages whose payload failed to decode.
    pub rejected: u64,
    /// Decoded records that could not be persisted.
    pub failed: u64,
}

/// Receives record events for one subject pattern.
pub struct Consumer {
    pattern: SubjectPattern,
    /// Guards decode -> reconcile -> persist. `None` for observers.
    reconciler: Option<Mutex<Reconciler>>,
    stats: Mutex<ConsumerStats>,
}

impl Consumer {
    /// A consumer that decodes and logs records without reconciling.
    pub fn observer(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: SubjectPattern::parse(pattern)?,
            reconciler: None,
            stats: Mutex::new(ConsumerStats::default()),
        })
    }

    /// A consumer that reconciles into the snapshot. The pattern must cover
    /// every event kind in `topics`.
    pub fn aggregate(
        pattern: &str,
        topics: &Topics,
        snapshot: SnapshotFile,
        start: SnapshotStart,
    ) -> Result<Self> {
        let parsed = SubjectPattern::parse(pattern)?;
        if !parsed.covers(&topics.all_subjects()) {
            return Err(RelayError::InvalidConfig(format!(
                "{pattern} does not cover every event topic; cannot aggregate"
            )));
        }

        Ok(Self {
            pattern: parsed,
            reconciler: Some(Mutex::new(Reconciler::open(snapshot, start)?)),
            stats: Mutex::new(ConsumerStats::default()),
        })
    }

    /// Aggregate when `pattern` covers every event kind, observer otherwise.
    ///
    /// The snapshot file is only touched in the aggregate case.
    pub fn for_pattern(
        pattern: &str,
        topics: &Topics,
        snapshot: SnapshotFile,
        start: SnapshotStart,
    ) -> Result<Self> {
        let parsed = SubjectPattern::parse(pattern)?;
        if parsed.covers(&topics.all_subjects()) {
            Self::aggregate(pattern, topics, snapshot, start)
        } else {
            Self::observer(pattern)
        }
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_aggregate(&self) -> bool {
        self.reconciler.is_some()
    }

    pub fn stats(&self) -> ConsumerStats {
        *self.stats.lock()
    }

    /// Current snapshot entries in order, for aggregate consumers.
    pub fn snapshot(&self) -> Option<Vec<crate::types::Record>> {
        self.reconciler
            .as_ref()
            .map(|r| r.lock().snapshot().records().to_vec())
    }

    /// Handle one delivered message.
    ///
    /// Returns the reconcile outcome for aggregate consumers and `None` for
    /// observers.
    pub fn handle(&self, message: &Message) -> Result<Option<ReconcileOutcome>> {
        self.stats.lock().received += 1;

        let Some(reconciler) = &self.reconciler else {
            let record = self.decode(message)?;
            tracing::info!(
                subject = %message.subject,
                identity = record.identity(),
                "received record"
            );
            return Ok(None);
        };

        let mut reconciler = reconciler.lock();
        let record = self.decode(message)?;
        let identity = record.identity().to_string();

        match reconciler.reconcile(record) {
            Ok(outcome) => {
                self.stats.lock().reconciled += 1;
                tracing::info!(
                    subject = %message.subject,
                    identity = %identity,
                    replaced = matches!(outcome, ReconcileOutcome::Replaced { .. }),
                    "reconciled record"
                );
                Ok(Some(outcome))
            }
            Err(e) => {
                self.stats.lock().failed += 1;
                Err(e)
            }
        }
    }

    fn decode(&self, message: &Message) -> Result<crate::types::Record> {
        wire::decode(&message.payload).map_err(|e| {
            self.stats.lock().rejected += 1;
            e
        })
    }

    /// Process events until the subscription is dropped or disconnected.
    ///
    /// A message that fails is logged and skipped.
    pub fn run(&self, subscription: BusSubscription) -> ConsumerStats {
        tracing::info!(
            pattern = %subscription.pattern,
            aggregate = self.is_aggregate(),
            "subscribed"
        );

        while let Ok(event) = subscription.recv() {
            match event {
                BusEvent::Message(message) => {
                    if let Err(e) = self.handle(&message) {
                        tracing::error!(subject = %message.subject, error = %e, "failed to handle message");
                    }
                }
                BusEvent::Dropped { reason } => {
                    tracing::warn!(?reason, "subscription dropped by bus");
                    break;
                }
            }
        }

        let stats = self.stats();
        tracing::info!(?stats, "consumer stopped");
        stats
    }

    /// Run on a dedicated thread.
    pub fn spawn(self: Arc<Self>, subscription: BusSubscription) -> Result<JoinHandle<ConsumerStats>> {
        let handle = thread::Builder::new()
            .name(format!("consumer-{}", self.pattern))
            .spawn(move || self.run(subscription))?;
        Ok(handle)
    }
}
