//! Record store: the authoritative, append-only history of sample versions.

use crate::error::{RelayError, Result};
use crate::records::{IdentityIndex, IndexEntry, VersionLog};
use crate::types::{Record, StoredVersion, StoredVersionId};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Access to the history of stored versions.
///
/// Implementations never edit or delete a stored version.
pub trait RecordStore: Send + Sync {
    /// Latest version of an identity: greatest `last_modified`, later append
    /// on ties. `Ok(None)` when the identity has never been stored.
    fn latest(&self, identity: &str) -> Result<Option<StoredVersion>>;

    /// Append a new version. `record.last_modified` must be set.
    fn insert(&self, record: Record) -> Result<StoredVersionId>;

    /// Every version of an identity, oldest append first.
    fn versions(&self, identity: &str) -> Result<Vec<StoredVersion>>;

    /// Total number of stored versions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    versions: RwLock<HashMap<String, Vec<StoredVersion>>>,
    next_id: Mutex<u64>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn latest(&self, identity: &str) -> Result<Option<StoredVersion>> {
        Ok(self.versions.read().get(identity).and_then(|versions| {
            versions
                .iter()
                .max_by_key(|v| (v.last_modified, v.id))
                .cloned()
        }))
    }

    fn insert(&self, record: Record) -> Result<StoredVersionId> {
        let last_modified = record.last_modified.ok_or_else(|| {
            RelayError::InvalidOperation("stored versions require last_modified".into())
        })?;

        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            StoredVersionId(*next)
        };

        self.versions
            .write()
            .entry(record.identity().to_string())
            .or_default()
            .push(StoredVersion {
                id,
                last_modified,
                record,
            });

        Ok(id)
    }

    fn versions(&self, identity: &str) -> Result<Vec<StoredVersion>> {
        Ok(self.versions.read().get(identity).cloned().unwrap_or_default())
    }

    fn len(&self) -> usize {
        self.versions.read().values().map(Vec::len).sum()
    }
}

/// Version store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            create_if_missing: true,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"SRS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// File-backed record store.
///
/// A directory holding a `MANIFEST`, an exclusive `LOCK` and the append-only
/// `versions.log`. The identity index is rebuilt from the log on open.
pub struct VersionStore {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Version log.
    log: VersionLog,

    /// Identity index.
    index: IdentityIndex,

    /// Serializes appends so log order and index order agree.
    write_lock: Mutex<()>,
}

impl VersionStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(RelayError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let log = VersionLog::open(config.path.join("versions.log"))?;

        tracing::info!(path = %config.path.display(), "created version store");

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            index: IdentityIndex::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let log = VersionLog::open(config.path.join("versions.log"))?;
        let index = IdentityIndex::new();
        Self::rebuild_index(&log, &index)?;

        tracing::info!(
            path = %config.path.display(),
            versions = index.count(),
            identities = index.identity_count(),
            "opened version store"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            index,
            write_lock: Mutex::new(()),
        })
    }

    fn rebuild_index(log: &VersionLog, index: &IdentityIndex) -> Result<()> {
        for result in log.iter() {
            let (offset, version) = result?;
            index.add(
                version.record.identity(),
                IndexEntry {
                    id: version.id,
                    last_modified: version.last_modified,
                    offset,
                },
            );
        }
        Ok(())
    }

    /// Number of distinct identities stored.
    pub fn identity_count(&self) -> usize {
        self.index.identity_count()
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(RelayError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(RelayError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| RelayError::Locked)?;

        Ok(lock_file)
    }
}

impl RecordStore for VersionStore {
    fn latest(&self, identity: &str) -> Result<Option<StoredVersion>> {
        match self.index.latest(identity) {
            Some(entry) => Ok(Some(self.log.read_at(entry.offset)?)),
            None => Ok(None),
        }
    }

    fn insert(&self, record: Record) -> Result<StoredVersionId> {
        let _lock = self.write_lock.lock();

        let (version, offset) = self.log.append(record)?;
        self.index.add(
            version.record.identity(),
            IndexEntry {
                id: version.id,
                last_modified: version.last_modified,
                offset,
            },
        );

        Ok(version.id)
    }

    fn versions(&self, identity: &str) -> Result<Vec<StoredVersion>> {
        self.index
            .history(identity)
            .into_iter()
            .map(|entry| self.log.read_at(entry.offset))
            .collect()
    }

    fn len(&self) -> usize {
        self.index.count()
    }
}

impl Drop for VersionStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
