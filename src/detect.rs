//! Change detection against the latest stored version.

use crate::error::Result;
use crate::store::RecordStore;
use crate::types::{Record, StoredVersion};

/// Outcome of comparing a candidate with the record store.
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// No version with this identity has been stored.
    New,
    /// The latest stored version differs in at least one field.
    Changed { previous: StoredVersion },
    /// The latest stored version is structurally equal to the candidate.
    Unchanged { previous: StoredVersion },
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Changed { .. } => "changed",
            Classification::Unchanged { .. } => "unchanged",
        }
    }

    /// Whether the candidate must be written as a new stored version.
    pub fn needs_write(&self) -> bool {
        !matches!(self, Classification::Unchanged { .. })
    }
}

/// Classifies candidates as new, changed or unchanged.
pub struct ChangeDetector<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Classify one candidate. Performs a single store read and no writes.
    ///
    /// `last_modified` is cleared on both sides before the comparison.
    pub fn classify(&self, candidate: &Record) -> Result<Classification> {
        let Some(previous) = self.store.latest(candidate.identity())? else {
            return Ok(Classification::New);
        };

        let stored = previous.record.without_storage_metadata();
        let candidate = candidate.without_storage_metadata();

        if stored == candidate {
            Ok(Classification::Unchanged { previous })
        } else {
            Ok(Classification::Changed { previous })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::store::MemoryRecordStore;
    use crate::types::{StoredVersionId, Timestamp};

    fn stored(store: &MemoryRecordStore, record: &Record, ts: i64) {
        let mut record = record.clone();
        record.last_modified = Some(Timestamp(ts));
        store.insert(record).unwrap();
    }

    #[test]
    fn test_new_when_no_prior_version() {
        let store = MemoryRecordStore::new();
        let detector = ChangeDetector::new(&store);

        let result = detector.classify(&Record::new("S1")).unwrap();
        assert_eq!(result, Classification::New);
        assert!(result.needs_write());
    }

    #[test]
    fn test_unchanged_ignores_last_modified() {
        let store = MemoryRecordStore::new();
        let record = Record::new("S1").with_attribute("field", "x");
        stored(&store, &record, 100);

        let mut candidate = record.clone();
        candidate.last_modified = Some(Timestamp(999));

        let result = ChangeDetector::new(&store).classify(&candidate).unwrap();
        assert!(matches!(result, Classification::Unchanged { .. }));
        assert!(!result.needs_write());
    }

    #[test]
    fn test_changed_on_any_field() {
        let store = MemoryRecordStore::new();
        let base = Record::new("S1")
            .with_attribute("field", "x")
            .with_measurement("tmb", 4.0, "mut/Mb");
        stored(&store, &base, 100);
        let detector = ChangeDetector::new(&store);

        let mut typed = base.clone();
        typed.meta_data.cancer_type = "Glioma".into();
        let variants = [
            base.clone().with_attribute("field", "y"),
            base.clone().with_attribute("other", "z"),
            base.clone().with_measurement("msi", 0.1, ""),
            typed,
        ];

        for candidate in &variants {
            let result = detector.classify(candidate).unwrap();
            assert_eq!(result.label(), "changed", "candidate {:?}", candidate);
        }
    }

    #[test]
    fn test_compares_against_latest_version_only() {
        let store = MemoryRecordStore::new();
        let old = Record::new("S1").with_attribute("field", "x");
        let current = Record::new("S1").with_attribute("field", "y");
        stored(&store, &current, 200);
        stored(&store, &old, 100);

        let detector = ChangeDetector::new(&store);
        match detector.classify(&current).unwrap() {
            Classification::Unchanged { previous } => {
                assert_eq!(previous.id, StoredVersionId(1));
            }
            other => panic!("expected unchanged, got {:?}", other),
        }
        assert_eq!(detector.classify(&old).unwrap().label(), "changed");
    }

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn latest(&self, _identity: &str) -> Result<Option<StoredVersion>> {
            Err(RelayError::Transport("connection reset".into()))
        }
        fn insert(&self, _record: Record) -> Result<StoredVersionId> {
            unreachable!()
        }
        fn versions(&self, _identity: &str) -> Result<Vec<StoredVersion>> {
            unreachable!()
        }
        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_store_error_propagates() {
        let result = ChangeDetector::new(&FailingStore).classify(&Record::new("S1"));
        assert!(matches!(result, Err(RelayError::Transport(_))));
    }
}
