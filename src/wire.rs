//! Wire schema for record events.
//!
//! Typed record fields map onto numbered protobuf fields. Untyped payload
//! fields travel in an `extra` field as canonical JSON (keys sorted), so the
//! event carries the whole record and stays diffable when dumped.
//!
//! Both directions validate: a record that [`decode`] would reject is never
//! encoded.

use crate::error::{RelayError, Result};
use crate::types::{Measurement, Record, SampleMetadata, Timestamp};
use prost::Message;
use serde_json::Value;
use std::collections::BTreeMap;

/// Version of the wire schema carried in every event.
pub const WIRE_SCHEMA_VERSION: u32 = 1;

/// A record on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct WireRecord {
    #[prost(uint32, tag = "1")]
    pub schema_version: u32,

    #[prost(message, optional, tag = "2")]
    pub meta_data: Option<WireMetadata>,

    #[prost(message, repeated, tag = "3")]
    pub measurements: Vec<WireMeasurement>,

    #[prost(int64, optional, tag = "4")]
    pub last_modified: Option<i64>,

    /// Untyped top-level fields as a JSON object. Empty when there are none.
    #[prost(bytes = "vec", tag = "5")]
    pub extra: Vec<u8>,
}

/// Sample metadata on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct WireMetadata {
    #[prost(string, tag = "1")]
    pub dmp_sample_id: String,

    #[prost(string, tag = "2")]
    pub dmp_patient_id: String,

    #[prost(string, tag = "3")]
    pub sample_type: String,

    #[prost(string, tag = "4")]
    pub cancer_type: String,

    #[prost(string, tag = "5")]
    pub gene_panel: String,

    #[prost(btree_map = "string, string", tag = "6")]
    pub attributes: BTreeMap<String, String>,

    #[prost(bytes = "vec", tag = "7")]
    pub extra: Vec<u8>,
}

/// Measurement on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct WireMeasurement {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(double, tag = "2")]
    pub value: f64,

    #[prost(string, tag = "3")]
    pub unit: String,

    #[prost(bytes = "vec", tag = "4")]
    pub extra: Vec<u8>,
}

const RECORD_FIELDS: &[&str] = &["meta_data", "measurements", "last_modified"];
const METADATA_FIELDS: &[&str] = &[
    "dmp_sample_id",
    "dmp_patient_id",
    "sample_type",
    "cancer_type",
    "gene_panel",
    "attributes",
];
const MEASUREMENT_FIELDS: &[&str] = &["name", "value", "unit"];

/// Render untyped fields as canonical JSON. A key that shadows a typed
/// field would not survive a round trip, so it is rejected.
fn encode_extra(extra: &BTreeMap<String, Value>, typed: &[&str], at: &str) -> Result<Vec<u8>> {
    if extra.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(key) = extra.keys().find(|k| typed.contains(&k.as_str())) {
        return Err(RelayError::Schema(format!(
            "{at} field {key:?} collides with a typed field"
        )));
    }
    Ok(serde_json::to_vec(extra)?)
}

fn decode_extra(bytes: &[u8], at: &str) -> Result<BTreeMap<String, Value>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| RelayError::Schema(format!("{at} extra fields are not a JSON object: {e}")))
}

impl WireRecord {
    /// Build the wire form of a record, validating it first.
    pub fn from_record(record: &Record) -> Result<Self> {
        let meta = &record.meta_data;
        let wire = Self {
            schema_version: WIRE_SCHEMA_VERSION,
            meta_data: Some(WireMetadata {
                dmp_sample_id: meta.dmp_sample_id.clone(),
                dmp_patient_id: meta.dmp_patient_id.clone(),
                sample_type: meta.sample_type.clone(),
                cancer_type: meta.cancer_type.clone(),
                gene_panel: meta.gene_panel.clone(),
                attributes: meta.attributes.clone(),
                extra: encode_extra(&meta.extra, METADATA_FIELDS, "meta_data")?,
            }),
            measurements: record
                .measurements
                .iter()
                .map(|m| -> Result<WireMeasurement> {
                    Ok(WireMeasurement {
                        name: m.name.clone(),
                        value: m.value,
                        unit: m.unit.clone(),
                        extra: encode_extra(&m.extra, MEASUREMENT_FIELDS, "measurement")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            last_modified: record.last_modified.map(|t| t.0),
            extra: encode_extra(&record.extra, RECORD_FIELDS, "record")?,
        };
        wire.validate()?;
        Ok(wire)
    }

    /// Check the message is a well-formed record.
    fn validate(&self) -> Result<&WireMetadata> {
        if self.schema_version != WIRE_SCHEMA_VERSION {
            return Err(RelayError::Schema(format!(
                "unsupported schema version {} (expected {})",
                self.schema_version, WIRE_SCHEMA_VERSION
            )));
        }
        let meta = self
            .meta_data
            .as_ref()
            .ok_or_else(|| RelayError::Schema("missing meta_data".into()))?;
        if meta.dmp_sample_id.is_empty() {
            return Err(RelayError::Schema("empty dmp_sample_id".into()));
        }
        if let Some(m) = self.measurements.iter().find(|m| !m.value.is_finite()) {
            return Err(RelayError::Schema(format!(
                "measurement {:?} is not a finite number",
                m.name
            )));
        }
        Ok(meta)
    }

    /// Convert a decoded message into a record, validating it first.
    pub fn into_record(self) -> Result<Record> {
        self.validate()?;
        let meta = self.meta_data.unwrap_or_default();

        Ok(Record {
            meta_data: SampleMetadata {
                dmp_sample_id: meta.dmp_sample_id,
                dmp_patient_id: meta.dmp_patient_id,
                sample_type: meta.sample_type,
                cancer_type: meta.cancer_type,
                gene_panel: meta.gene_panel,
                attributes: meta.attributes,
                extra: decode_extra(&meta.extra, "meta_data")?,
            },
            measurements: self
                .measurements
                .into_iter()
                .map(|m| -> Result<Measurement> {
                    Ok(Measurement {
                        extra: decode_extra(&m.extra, "measurement")?,
                        name: m.name,
                        value: m.value,
                        unit: m.unit,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            last_modified: self.last_modified.map(Timestamp),
            extra: decode_extra(&self.extra, "record")?,
        })
    }
}

/// Encode a record into event bytes.
///
/// Fails with [`RelayError::Schema`] for a record consumers would reject.
pub fn encode(record: &Record) -> Result<Vec<u8>> {
    let wire = WireRecord::from_record(record)?;
    let mut buf = Vec::with_capacity(wire.encoded_len());
    wire.encode(&mut buf)?;
    Ok(buf)
}

/// Decode event bytes into a record.
///
/// Rejects malformed protobuf, unknown fields, an unsupported schema
/// version, and records without an identity.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    let wire = WireRecord::decode(bytes)?;
    if wire.encoded_len() != bytes.len() {
        return Err(RelayError::Schema(format!(
            "payload carries {} bytes the schema does not describe",
            bytes.len().abs_diff(wire.encoded_len())
        )));
    }
    wire.into_record()
}
