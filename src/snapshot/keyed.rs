//! Ordered, identity-keyed record sequence.

use crate::types::Record;
use std::collections::HashMap;

/// What an upsert did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First record seen for this identity.
    Inserted,
    /// An older entry was removed from `previous_position`.
    Replaced { previous_position: usize },
}

/// Ordered sequence holding at most one record per identity.
///
/// Order is the order in which each identity was last received. The
/// identity -> position map is owned here and kept exact across removals.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    entries: Vec<Record>,
    positions: HashMap<String, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a persisted sequence, folding duplicate identities so the
    /// last occurrence wins.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut snapshot = Self::new();
        for record in records {
            snapshot.upsert(record);
        }
        snapshot
    }

    /// Remove any entry with the record's identity, then append the record.
    pub fn upsert(&mut self, record: Record) -> ReconcileOutcome {
        let outcome = match self.positions.remove(record.identity()) {
            Some(removed) => {
                self.entries.remove(removed);
                for position in self.positions.values_mut() {
                    if *position > removed {
                        *position -= 1;
                    }
                }
                ReconcileOutcome::Replaced {
                    previous_position: removed,
                }
            }
            None => ReconcileOutcome::Inserted,
        };

        self.positions
            .insert(record.identity().to_string(), self.entries.len());
        self.entries.push(record);
        outcome
    }

    pub fn get(&self, identity: &str) -> Option<&Record> {
        self.position(identity).map(|p| &self.entries[p])
    }

    pub fn position(&self, identity: &str) -> Option<usize> {
        self.positions.get(identity).copied()
    }

    pub fn records(&self) -> &[Record] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
