//! Publish side: version writing, event publishing and the batch run.

use crate::bus::BusTransport;
use crate::config::{RetryPolicy, Topics, UnchangedPolicy};
use crate::detect::{ChangeDetector, Classification};
use crate::error::{RelayError, Result};
use crate::retry::retry;
use crate::store::RecordStore;
use crate::types::{EventKind, Record, StoredVersionId, Timestamp};
use crate::wire;
use std::sync::Arc;

/// Appends new stored versions with a fresh `last_modified`.
pub struct VersionWriter {
    store: Arc<dyn RecordStore>,
    /// Last stamp handed out, so stamps from one writer strictly increase.
    last_stamp: Option<Timestamp>,
}

impl VersionWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            last_stamp: None,
        }
    }

    fn next_stamp(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last.next(),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    /// Store `record` as a new version. The caller's record is not modified.
    pub fn write(&mut self, record: &Record) -> Result<StoredVersionId> {
        let mut version = record.clone();
        version.last_modified = Some(self.next_stamp());
        let id = self.store.insert(version)?;
        tracing::info!(identity = record.identity(), version = %id, "inserted stored version");
        Ok(id)
    }
}

/// Serializes records and publishes them on the topic of their event kind.
pub struct EventPublisher {
    bus: Arc<dyn BusTransport>,
    topics: Topics,
    retry: RetryPolicy,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn BusTransport>, topics: Topics, retry: RetryPolicy) -> Self {
        Self { bus, topics, retry }
    }

    /// Encode and publish. Transient transport failures are retried; an
    /// encoding failure is returned immediately.
    pub fn publish(&self, record: &Record, kind: EventKind) -> Result<()> {
        let bytes = wire::encode(record)?;
        let subject = self.topics.subject(kind);
        tracing::debug!(identity = record.identity(), subject = %subject, bytes = bytes.len(), "publishing");

        retry(&self.retry, "publish", |_| self.bus.publish(&subject, &bytes))?;
        tracing::info!(identity = record.identity(), subject = %subject, "sent");
        Ok(())
    }
}

/// Result of processing one candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordOutcome {
    pub identity: String,
    pub classification: Classification,
    /// Stored version written for this candidate, if any.
    pub version: Option<StoredVersionId>,
    /// Event kind published, if any.
    pub published: Option<EventKind>,
}

/// A candidate whose processing failed.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordFailure {
    pub identity: String,
    pub error: String,
}

/// An event that could not be delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct DeadLetter {
    pub record: Record,
    pub kind: EventKind,
    pub error: String,
}

/// Counts for one publish run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub published: usize,
    pub suppressed: usize,
    pub failures: Vec<RecordFailure>,
    pub dead_letters: Vec<DeadLetter>,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.new + self.changed + self.unchanged
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs change detection, versioning and publishing over a batch.
pub struct Publisher {
    store: Arc<dyn RecordStore>,
    writer: VersionWriter,
    events: EventPublisher,
    unchanged: UnchangedPolicy,
}

impl Publisher {
    pub fn new(store: Arc<dyn RecordStore>, events: EventPublisher, unchanged: UnchangedPolicy) -> Self {
        Self {
            writer: VersionWriter::new(Arc::clone(&store)),
            store,
            events,
            unchanged,
        }
    }

    /// Classify a candidate and store it if new or changed. Returns the
    /// event kind to publish, if any.
    fn classify_and_store(
        &mut self,
        candidate: &Record,
    ) -> Result<(Classification, Option<StoredVersionId>, Option<EventKind>)> {
        // A version is only stored if it can be announced.
        wire::WireRecord::from_record(candidate)?;
        let classification = ChangeDetector::new(self.store.as_ref()).classify(candidate)?;
        tracing::info!(
            identity = candidate.identity(),
            classification = classification.label(),
            "classified"
        );

        let kind = match (&classification, self.unchanged) {
            (Classification::New, _) => Some(EventKind::New),
            (Classification::Changed { .. }, _) => Some(EventKind::Updated),
            (Classification::Unchanged { .. }, UnchangedPolicy::Reannounce) => Some(EventKind::New),
            (Classification::Unchanged { .. }, UnchangedPolicy::Suppress) => None,
        };

        let version = if classification.needs_write() {
            Some(self.writer.write(candidate)?)
        } else {
            None
        };

        Ok((classification, version, kind))
    }

    /// Classify one candidate, store it if new or changed, and publish it.
    pub fn process(&mut self, candidate: &Record) -> Result<RecordOutcome> {
        let (classification, version, kind) = self.classify_and_store(candidate)?;
        if let Some(kind) = kind {
            self.events.publish(candidate, kind)?;
        }

        Ok(RecordOutcome {
            identity: candidate.identity().to_string(),
            classification,
            version,
            published: kind,
        })
    }

    /// Process every candidate. A failing candidate is recorded in the
    /// summary and the run continues with the next one.
    ///
    /// An event that cannot be delivered after its version was stored is
    /// kept as a dead letter.
    pub fn run(&mut self, candidates: &[Record]) -> RunSummary {
        let mut summary = RunSummary::default();

        for candidate in candidates {
            let identity = candidate.identity();
            let (classification, _version, kind) = match self.classify_and_store(candidate) {
                Ok(prepared) => prepared,
                Err(e) => {
                    tracing::error!(identity, error = %e, "failed to process record");
                    summary.failures.push(RecordFailure {
                        identity: identity.to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if let Some(kind) = kind {
                if let Err(e) = self.events.publish(candidate, kind) {
                    if is_delivery_failure(&e) {
                        tracing::error!(identity, ?kind, error = %e, "dead-lettered event");
                        summary.dead_letters.push(DeadLetter {
                            record: candidate.clone(),
                            kind,
                            error: e.to_string(),
                        });
                    } else {
                        tracing::error!(identity, error = %e, "failed to publish record");
                    }
                    summary.failures.push(RecordFailure {
                        identity: identity.to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            match classification {
                Classification::New => summary.new += 1,
                Classification::Changed { .. } => summary.changed += 1,
                Classification::Unchanged { .. } => summary.unchanged += 1,
            }
            if kind.is_some() {
                summary.published += 1;
            } else {
                summary.suppressed += 1;
            }
        }

        tracing::info!(
            new = summary.new,
            changed = summary.changed,
            unchanged = summary.unchanged,
            published = summary.published,
            failed = summary.failed(),
            dead_letters = summary.dead_letters.len(),
            "publish run finished"
        );
        summary
    }
}

fn is_delivery_failure(error: &RelayError) -> bool {
    matches!(error, RelayError::RetriesExhausted { .. }) || error.is_transient()
}
