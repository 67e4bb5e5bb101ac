//! Core types for the sample catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned by the record store to each stored version.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoredVersionId(pub u64);

impl fmt::Debug for StoredVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoredVersionId({})", self.0)
    }
}

impl fmt::Display for StoredVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. Clamps to zero if the clock reads before the epoch.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    pub fn next(self) -> Self {
        Timestamp(self.0 + 1)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Descriptive metadata of a sample. `dmp_sample_id` is the record identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub dmp_sample_id: String,

    #[serde(default)]
    pub dmp_patient_id: String,

    #[serde(default)]
    pub sample_type: String,

    #[serde(default)]
    pub cancer_type: String,

    #[serde(default)]
    pub gene_panel: String,

    /// Free-form string metadata.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Any other metadata key, kept as received.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A single named measurement taken on a sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One observation of a sample in the catalog.
///
/// `last_modified` is storage metadata: it is only assigned by the version
/// writer and never takes part in change detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub meta_data: SampleMetadata,

    #[serde(default)]
    pub measurements: Vec<Measurement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,

    /// Payload fields outside `meta_data` and `measurements`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record {
    /// Create a record carrying only its identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            meta_data: SampleMetadata {
                dmp_sample_id: identity.into(),
                ..Default::default()
            },
            measurements: Vec::new(),
            last_modified: None,
            extra: BTreeMap::new(),
        }
    }

    /// Stable identity of the real-world sample.
    pub fn identity(&self) -> &str {
        &self.meta_data.dmp_sample_id
    }

    /// Set a free-form metadata attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_data.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a measurement.
    pub fn with_measurement(mut self, name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        self.measurements.push(Measurement {
            name: name.into(),
            value,
            unit: unit.into(),
            extra: BTreeMap::new(),
        });
        self
    }

    /// Set an untyped metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta_data.extra.insert(key.into(), value.into());
        self
    }

    /// Copy of this record with storage metadata cleared, for structural comparison.
    pub fn without_storage_metadata(&self) -> Self {
        Self {
            last_modified: None,
            ..self.clone()
        }
    }

    /// Structural equality ignoring `last_modified`.
    pub fn same_content(&self, other: &Record) -> bool {
        self.meta_data == other.meta_data
            && self.measurements == other.measurements
            && self.extra == other.extra
    }
}

/// An immutable, timestamped copy of a record held by the record store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredVersion {
    pub id: StoredVersionId,
    pub last_modified: Timestamp,
    pub record: Record,
}

/// Kind of event, encoded by the topic it is published on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First sighting of a record (also used for re-announced unchanged records).
    New,
    /// Revision of a previously stored record.
    Updated,
}
