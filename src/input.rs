//! Input batch loading.

use crate::error::Result;
use crate::types::Record;
use serde::Deserialize;
use std::path::Path;

/// A batch of candidate records, as delivered by the upstream fetch.
#[derive(Clone, Debug, Deserialize)]
pub struct InputBatch {
    pub results: Vec<Record>,
}

impl InputBatch {
    /// Parse a batch from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Read a batch from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let batch = Self::from_slice(&bytes)?;
        tracing::info!(
            path = %path.as_ref().display(),
            records = batch.results.len(),
            "loaded input batch"
        );
        Ok(batch)
    }
}
