//! Relay configuration.

use crate::error::{RelayError, Result};
use crate::types::EventKind;
use std::path::PathBuf;
use std::time::Duration;

/// Topic names used on the bus.
///
/// Subjects are `<prefix>.<kind>`; the aggregate subscription is `<prefix>.*`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub prefix: String,
    pub new_records: String,
    pub updated_records: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            prefix: "channels".to_string(),
            new_records: "insertNewChannel".to_string(),
            updated_records: "insertUpdateChannel".to_string(),
        }
    }
}

impl Topics {
    /// Subject an event of the given kind is published on.
    pub fn subject(&self, kind: EventKind) -> String {
        let name = match kind {
            EventKind::New => &self.new_records,
            EventKind::Updated => &self.updated_records,
        };
        format!("{}.{}", self.prefix, name)
    }

    /// Wildcard subject covering every event kind.
    pub fn aggregate(&self) -> String {
        format!("{}.*", self.prefix)
    }

    /// All concrete subjects.
    pub fn all_subjects(&self) -> [String; 2] {
        [self.subject(EventKind::New), self.subject(EventKind::Updated)]
    }
}

/// Bounded retry with exponential backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// What to do with a candidate identical to its latest stored version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnchangedPolicy {
    /// Publish it again on the new-record topic.
    #[default]
    Reannounce,
    /// Publish nothing.
    Suppress,
}

/// How an aggregate consumer treats an existing snapshot file at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotStart {
    /// Load the file as prior consolidation state.
    #[default]
    Resume,
    /// Truncate the file and start from an empty snapshot.
    Reset,
}

/// Relay configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Directory of the file-backed record store.
    pub store_path: PathBuf,

    /// Input batch of candidate records.
    pub input_path: PathBuf,

    /// Consolidated snapshot written by the aggregate consumer.
    pub snapshot_path: PathBuf,

    pub topics: Topics,

    /// Retry policy for bus connection and transient publish failures.
    pub retry: RetryPolicy,

    pub unchanged: UnchangedPolicy,

    pub snapshot_start: SnapshotStart,

    /// Max buffered messages per bus subscription.
    /// Default: 1000
    pub bus_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("./store"),
            input_path: PathBuf::from("./fetch.json"),
            snapshot_path: PathBuf::from("./snapshot.json"),
            topics: Topics::default(),
            retry: RetryPolicy::default(),
            unchanged: UnchangedPolicy::default(),
            snapshot_start: SnapshotStart::default(),
            bus_buffer_size: 1000,
        }
    }
}

impl RelayConfig {
    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(RelayError::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(RelayError::InvalidConfig("retry.multiplier must be >= 1.0".into()));
        }
        if self.bus_buffer_size == 0 {
            return Err(RelayError::InvalidConfig("bus_buffer_size must be positive".into()));
        }
        let topics = &self.topics;
        for part in [&topics.prefix, &topics.new_records, &topics.updated_records] {
            if part.is_empty() || part.contains(['.', '*', '>', ' ']) {
                return Err(RelayError::InvalidConfig(format!("invalid subject token: {part:?}")));
            }
        }
        if topics.new_records == topics.updated_records {
            return Err(RelayError::InvalidConfig("new and updated topics must differ".into()));
        }
        Ok(())
    }
}
