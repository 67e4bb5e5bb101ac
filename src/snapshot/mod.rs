//! Subscriber-side consolidation of record events.
//!
//! A [`Reconciler`] folds every received record into a [`Snapshot`] keyed by
//! identity and rewrites the snapshot file after each event.

mod file;
mod keyed;

use crate::config::SnapshotStart;
use crate::error::Result;
use crate::types::Record;

pub use file::SnapshotFile;
pub use keyed::{ReconcileOutcome, Snapshot};

/// Maintains the persisted, deduplicated snapshot.
pub struct Reconciler {
    snapshot: Snapshot,
    file: SnapshotFile,
}

impl Reconciler {
    /// Open the snapshot at `file`, resuming from or resetting its contents.
    pub fn open(file: SnapshotFile, start: SnapshotStart) -> Result<Self> {
        let snapshot = match start {
            SnapshotStart::Resume => Snapshot::from_records(file.load()?),
            SnapshotStart::Reset => {
                file.reset()?;
                Snapshot::new()
            }
        };

        tracing::info!(
            path = %file.path().display(),
            ?start,
            entries = snapshot.len(),
            "opened snapshot"
        );

        Ok(Self { snapshot, file })
    }

    /// Fold one received record into the snapshot and persist the result.
    ///
    /// Applying the same record twice leaves a single entry equal to it.
    /// If the write fails the in-memory snapshot is left as it was.
    pub fn reconcile(&mut self, record: Record) -> Result<ReconcileOutcome> {
        let identity = record.identity().to_string();
        let mut next = self.snapshot.clone();
        let outcome = next.upsert(record);
        self.file.write(next.records())?;
        self.snapshot = next;

        match outcome {
            ReconcileOutcome::Inserted => {
                tracing::debug!(identity = %identity, "snapshot entry added");
            }
            ReconcileOutcome::Replaced { previous_position } => {
                tracing::debug!(identity = %identity, previous_position, "snapshot entry replaced");
            }
        }

        Ok(outcome)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn file(&self) -> &SnapshotFile {
        &self.file
    }
}
