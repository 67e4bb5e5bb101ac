//! Identity index over the version log.

use crate::types::{StoredVersionId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Location of one stored version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: StoredVersionId,
    pub last_modified: Timestamp,
    pub offset: u64,
}

impl IndexEntry {
    /// Ordering key for "latest": greatest timestamp, later append breaks ties.
    fn recency(&self) -> (Timestamp, StoredVersionId) {
        (self.last_modified, self.id)
    }
}

/// In-memory index from record identity to its stored versions.
///
/// Rebuilt from the log on open; not persisted.
#[derive(Default)]
pub struct IdentityIndex {
    /// identity -> versions in append order.
    versions: RwLock<HashMap<String, Vec<IndexEntry>>>,

    /// Total number of indexed versions.
    count: RwLock<usize>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version to the index.
    pub fn add(&self, identity: &str, entry: IndexEntry) {
        self.versions
            .write()
            .entry(identity.to_string())
            .or_default()
            .push(entry);
        *self.count.write() += 1;
    }

    /// Most recent version of an identity.
    pub fn latest(&self, identity: &str) -> Option<IndexEntry> {
        self.versions
            .read()
            .get(identity)
            .and_then(|entries| entries.iter().max_by_key(|e| e.recency()).copied())
    }

    /// All versions of an identity, in append order.
    pub fn history(&self, identity: &str) -> Vec<IndexEntry> {
        self.versions
            .read()
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of distinct identities.
    pub fn identity_count(&self) -> usize {
        self.versions.read().len()
    }

    /// Number of indexed versions.
    pub fn count(&self) -> usize {
        *self.count.read()
    }
}
