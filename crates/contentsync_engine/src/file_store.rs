//! File-backed status store.

use crate::error::{SyncError, SyncResult};
use crate::ledger::{StatusKey, StatusRecord, StatusStore};
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    records: BTreeMap<StatusKey, StatusRecord>,
    watermarks: BTreeMap<String, i64>,
}

/// A status store persisted as a CBOR snapshot.
///
/// Every write rewrites the snapshot to a temporary file and renames it over
/// the previous one, so a crash leaves either the old or the new state.
///
/// # Locking
///
/// An exclusive lock on `<path>.lock` is held for the lifetime of the store;
/// a second process opening the same ledger gets [`SyncError::Storage`].
#[derive(Debug)]
pub struct FileStatusStore {
    path: PathBuf,
    state: RwLock<Snapshot>,
    _lock: File,
}

impl FileStatusStore {
    /// Opens or creates a ledger at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere, the file cannot be
    /// read, or the snapshot is not valid CBOR.
    pub fn open(path: &Path) -> SyncResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.with_extension("lock"))?;
        lock.try_lock_exclusive().map_err(|_| {
            SyncError::Storage(format!("ledger {} is locked by another process", path.display()))
        })?;

        let state = if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            ciborium::from_reader(reader)
                .map_err(|e| SyncError::Storage(format!("corrupt ledger snapshot: {e}")))?
        } else {
            Snapshot::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(state),
            _lock: lock,
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, snapshot: &Snapshot) -> SyncResult<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            ciborium::into_writer(snapshot, &mut writer)
                .map_err(|e| SyncError::Storage(format!("failed to encode ledger: {e}")))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Applies `change` to a copy of the state and keeps it once it is on disk.
    fn commit<F>(&self, change: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut state = self.state.write();
        let mut next = state.clone();
        change(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }
}

impl StatusStore for FileStatusStore {
    fn get(&self, key: &StatusKey) -> SyncResult<Option<StatusRecord>> {
        Ok(self.state.read().records.get(key).cloned())
    }

    fn create(&self, record: StatusRecord) -> SyncResult<StatusRecord> {
        let key = record.key();
        if let Some(existing) = self.state.read().records.get(&key) {
            return Ok(existing.clone());
        }
        let mut stored = record.clone();
        self.commit(|state| {
            stored = state.records.entry(key).or_insert(record).clone();
        })?;
        Ok(stored)
    }

    fn save(&self, record: &StatusRecord) -> SyncResult<()> {
        self.commit(|state| {
            state.records.insert(record.key(), record.clone());
        })
    }

    fn pool_watermark(&self, pool_id: &str) -> SyncResult<Option<i64>> {
        Ok(self.state.read().watermarks.get(pool_id).copied())
    }

    fn set_pool_watermark(&self, pool_id: &str, at: i64) -> SyncResult<()> {
        self.commit(|state| {
            state.watermarks.insert(pool_id.to_string(), at);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentsync_protocol::{Channel, ItemRef, SyncAction};
    use tempfile::tempdir;

    fn record() -> StatusRecord {
        StatusRecord::new(
            ItemRef::new("node", "article", "n1"),
            Channel::new("content", "main"),
            "v1",
        )
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger").join("status.cbor");

        {
            let store = FileStatusStore::open(&path).unwrap();
            let mut rec = store.create(record()).unwrap();
            rec.mark_pushed(42, "hash".into(), "v1", SyncAction::Create, false);
            store.save(&rec).unwrap();
            store.set_pool_watermark("main", 99).unwrap();
        }

        let store = FileStatusStore::open(&path).unwrap();
        let rec = store.get(&record().key()).unwrap().unwrap();
        assert_eq!(rec.last_push(), Some(42));
        assert_eq!(rec.push_hash(), Some("hash"));
        assert_eq!(store.pool_watermark("main").unwrap(), Some(99));
    }

    #[test]
    fn create_keeps_existing_record() {
        let dir = tempdir().unwrap();
        let store = FileStatusStore::open(&dir.path().join("status.cbor")).unwrap();

        let mut rec = store.create(record()).unwrap();
        rec.mark_pushed(1, "h".into(), "v1", SyncAction::Create, false);
        store.save(&rec).unwrap();

        let again = store.create(record()).unwrap();
        assert_eq!(again.push_hash(), Some("h"));
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let dir = tempdir().unwrap();
        let ledger_dir = dir.path().join("ledger");
        let store = FileStatusStore::open(&ledger_dir.join("status.cbor")).unwrap();
        store.set_pool_watermark("main", 10).unwrap();

        fs::remove_dir_all(&ledger_dir).unwrap();
        assert!(store.save(&record()).is_err());
        assert!(store.set_pool_watermark("main", 20).is_err());

        assert!(store.get(&record().key()).unwrap().is_none());
        assert_eq!(store.pool_watermark("main").unwrap(), Some(10));
    }

    #[test]
    fn second_open_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.cbor");
        let _first = FileStatusStore::open(&path).unwrap();

        let second = FileStatusStore::open(&path);
        assert!(matches!(second, Err(SyncError::Storage(_))));
    }
}
