//! Append-only log of stored versions.

use crate::error::{RelayError, Result};
use crate::types::{Record, StoredVersion, StoredVersionId, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for each version frame.
const FRAME_MAGIC: &[u8; 4] = b"SVR\0";

/// Current frame format version.
const FRAME_VERSION: u8 = 1;

/// Fixed part of a frame: magic + version + flags + id + timestamp + payload length.
const FRAME_HEADER_SIZE: u64 = 4 + 1 + 1 + 8 + 8 + 4;

/// Upper bound on a single record payload.
const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Append-only version log.
///
/// Each frame holds one stored version: the record is MessagePack-encoded and
/// guarded by a CRC32 of the payload. Frames are never rewritten.
pub struct VersionLog {
    /// Path to the log file.
    path: PathBuf,

    /// Log file handle.
    file: Mutex<File>,

    /// Next version ID to assign.
    next_id: RwLock<u64>,

    /// Current end of the log (for appending).
    file_size: RwLock<u64>,

    /// Number of writes since last sync.
    writes_since_sync: Mutex<u64>,

    /// Sync every N writes (1 = sync every write).
    sync_interval: u64,
}

impl VersionLog {
    /// Default sync interval. Versions are rare, so every write is synced.
    const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open or create a version log with the default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a version log with a custom sync interval.
    ///
    /// A torn frame at the end of the file (crash mid-append) is truncated
    /// away. Corruption anywhere else is an error.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let (max_id, valid_end) = Self::scan(&mut file)?;
        let file_size = file.metadata()?.len();
        if valid_end < file_size {
            tracing::warn!(
                path = %path.display(),
                valid_end,
                file_size,
                "truncating torn frame at end of version log"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            next_id: RwLock::new(max_id + 1),
            file_size: RwLock::new(valid_end),
            writes_since_sync: Mutex::new(0),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a version. The record must carry its `last_modified`.
    ///
    /// Returns the stored version and the offset where it was written.
    pub fn append(&self, record: Record) -> Result<(StoredVersion, u64)> {
        let last_modified = record.last_modified.ok_or_else(|| {
            RelayError::InvalidOperation("stored versions require last_modified".into())
        })?;

        let payload = rmp_serde::to_vec_named(&record)?;
        let mut file = self.file.lock();

        let id = {
            let mut next = self.next_id.write();
            let id = StoredVersionId(*next);
            *next += 1;
            id
        };

        let offset = *self.file_size.read();
        file.seek(SeekFrom::Start(offset))?;
        Self::write_frame(&mut file, id, last_modified, &payload)?;

        *self.file_size.write() = offset + FRAME_HEADER_SIZE + payload.len() as u64 + 4;

        let mut writes = self.writes_since_sync.lock();
        *writes += 1;
        if *writes >= self.sync_interval {
            file.sync_all()?;
            *writes = 0;
        }

        Ok((
            StoredVersion {
                id,
                last_modified,
                record,
            },
            offset,
        ))
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        *self.writes_since_sync.lock() = 0;
        Ok(())
    }

    /// Read the version at a given offset.
    pub fn read_at(&self, offset: u64) -> Result<StoredVersion> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let (version, _) = Self::read_frame(&mut *file)?;
        Ok(version)
    }

    /// Iterate all versions in append order, with their offsets.
    pub fn iter(&self) -> VersionIterator<'_> {
        VersionIterator {
            log: self,
            offset: 0,
            end: *self.file_size.read(),
        }
    }

    /// Current size of the valid log.
    pub fn size(&self) -> u64 {
        *self.file_size.read()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(file: &mut File, id: StoredVersionId, ts: Timestamp, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len() + 4);
        frame.extend_from_slice(FRAME_MAGIC);
        frame.push(FRAME_VERSION);
        // Flags (reserved)
        frame.push(0);
        frame.extend_from_slice(&id.0.to_le_bytes());
        frame.extend_from_slice(&ts.0.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        file.write_all(&frame)?;
        Ok(())
    }

    /// Read one frame at the current position. Returns the version and the frame length.
    fn read_frame(reader: &mut impl Read) -> Result<(StoredVersion, u64)> {
        let mut header = [0u8; FRAME_HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;

        if &header[0..4] != FRAME_MAGIC {
            return Err(RelayError::InvalidFormat("Invalid version frame magic".into()));
        }
        if header[4] != FRAME_VERSION {
            return Err(RelayError::InvalidFormat(format!(
                "Unsupported frame version: {}",
                header[4]
            )));
        }

        let id = StoredVersionId(u64::from_le_bytes(header[6..14].try_into().unwrap_or_default()));
        let last_modified = Timestamp(i64::from_le_bytes(header[14..22].try_into().unwrap_or_default()));
        let payload_len = u32::from_le_bytes(header[22..26].try_into().unwrap_or_default()) as usize;

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(RelayError::InvalidFormat(format!(
                "Version frame payload too large: {} bytes",
                payload_len
            )));
        }

        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(RelayError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let record: Record = rmp_serde::from_slice(&payload)?;
        let frame_len = FRAME_HEADER_SIZE + payload_len as u64 + 4;

        Ok((
            StoredVersion {
                id,
                last_modified,
                record,
            },
            frame_len,
        ))
    }

    /// Walk the file, returning the max version ID and the end of the last complete frame.
    fn scan(file: &mut File) -> Result<(u64, u64)> {
        let file_size = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        let mut reader = std::io::BufReader::new(&*file);

        let mut max_id = 0u64;
        let mut offset = 0u64;
        while offset < file_size {
            match Self::read_frame(&mut reader) {
                Ok((version, len)) => {
                    max_id = max_id.max(version.id.0);
                    offset += len;
                }
                Err(RelayError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        Ok((max_id, offset))
    }
}

/// Iterator over versions in the log.
pub struct VersionIterator<'a> {
    log: &'a VersionLog,
    offset: u64,
    end: u64,
}

impl Iterator for VersionIterator<'_> {
    type Item = Result<(u64, StoredVersion)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let current = self.offset;
        let mut file = self.log.file.lock();
        let result = file
            .seek(SeekFrom::Start(current))
            .map_err(RelayError::from)
            .and_then(|_| VersionLog::read_frame(&mut *file));

        match result {
            Ok((version, len)) => {
                self.offset = current + len;
                Some(Ok((current, version)))
            }
            Err(e) => {
                // Stop iteration on error
                self.offset = self.end;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stamped(identity: &str, ts: i64) -> Record {
        let mut record = Record::new(identity).with_attribute("field", "x");
        record.last_modified = Some(Timestamp(ts));
        record
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = VersionLog::open(dir.path().join("versions.log")).unwrap();

        let (version, offset) = log.append(stamped("S1", 100)).unwrap();
        assert_eq!(version.id, StoredVersionId(1));
        assert_eq!(version.last_modified, Timestamp(100));
        assert_eq!(offset, 0);

        let read = log.read_at(offset).unwrap();
        assert_eq!(read, version);
    }

    #[test]
    fn test_append_requires_timestamp() {
        let dir = TempDir::new().unwrap();
        let log = VersionLog::open(dir.path().join("versions.log")).unwrap();

        let result = log.append(Record::new("S1"));
        assert!(matches!(result, Err(RelayError::InvalidOperation(_))));
        assert_eq!(log.size(), 0);
    }

    #[test]
    fn test_iterate_in_append_order() {
        let dir = TempDir::new().unwrap();
        let log = VersionLog::open(dir.path().join("versions.log")).unwrap();

        for i in 1..=5 {
            log.append(stamped(&format!("S{}", i), i)).unwrap();
        }

        let versions: Vec<_> = log.iter().map(|r| r.unwrap().1).collect();
        assert_eq!(versions.len(), 5);
        assert_eq!(versions[0].record.identity(), "S1");
        assert_eq!(versions[4].id, StoredVersionId(5));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions.log");

        {
            let log = VersionLog::open(&path).unwrap();
            for i in 1..=3 {
                log.append(stamped("S1", i)).unwrap();
            }
        }

        {
            let log = VersionLog::open(&path).unwrap();
            assert_eq!(log.iter().count(), 3);

            let (version, _) = log.append(stamped("S1", 4)).unwrap();
            assert_eq!(version.id, StoredVersionId(4)); // continues from max ID
        }
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions.log");

        let good_size = {
            let log = VersionLog::open(&path).unwrap();
            log.append(stamped("S1", 1)).unwrap();
            log.size()
        };

        // Simulate a crash halfway through a second frame
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&FRAME_MAGIC[..]).unwrap();
            file.write_all(&[FRAME_VERSION, 0, 2]).unwrap();
        }

        let log = VersionLog::open(&path).unwrap();
        assert_eq!(log.size(), good_size);
        assert_eq!(log.iter().count(), 1);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions.log");

        {
            let log = VersionLog::open(&path).unwrap();
            log.append(stamped("S1", 1)).unwrap();
        }

        // Flip a payload byte
        {
            let mut bytes = std::fs::read(&path).unwrap();
            let idx = FRAME_HEADER_SIZE as usize + 2;
            bytes[idx] ^= 0xFF;
            std::fs::write(&path, bytes).unwrap();
        }

        let result = VersionLog::open(&path);
        assert!(matches!(result, Err(RelayError::ChecksumMismatch { .. })));
    }
}
