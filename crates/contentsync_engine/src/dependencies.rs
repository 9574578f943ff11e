//! Missing-dependency store: who is waiting on which unresolved item.

use crate::error::SyncResult;
use contentsync_protocol::{ItemRef, PullReason, Value};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One item waiting on a reference that could not be resolved yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingDependency {
    /// The item holding the unresolved reference.
    pub waiting: ItemRef,
    /// Reason of the pull that found the reference unresolved.
    pub reason: PullReason,
    /// Field to set directly once the target arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Handler-specific data for linking the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<BTreeMap<String, Value>>,
}

impl MissingDependency {
    /// Waiter that needs a full re-pull.
    pub fn repull(waiting: ItemRef, reason: PullReason) -> Self {
        Self {
            waiting,
            reason,
            field: None,
            custom_data: None,
        }
    }

    /// Waiter whose `field` can be set directly.
    pub fn field(waiting: ItemRef, reason: PullReason, field: impl Into<String>) -> Self {
        Self {
            waiting,
            reason,
            field: Some(field.into()),
            custom_data: None,
        }
    }

    /// Attaches handler-specific data.
    pub fn with_custom_data(mut self, data: BTreeMap<String, Value>) -> Self {
        self.custom_data = Some(data);
        self
    }

    fn duplicates(&self, other: &MissingDependency) -> bool {
        self.waiting.same_item(&other.waiting) && self.field == other.field
    }
}

/// Keyed persistence for missing-dependency entries.
///
/// Keys are `entity_type:identifier` of the referenced item.
pub trait DependencyStore: Send + Sync {
    /// Entries filed under `key`.
    fn get(&self, key: &str) -> SyncResult<Vec<MissingDependency>>;

    /// Replaces the entries under `key`.
    fn set(&self, key: &str, entries: Vec<MissingDependency>) -> SyncResult<()>;

    /// Removes all entries under `key`.
    fn delete(&self, key: &str) -> SyncResult<()>;
}

/// An in-memory dependency store.
#[derive(Debug, Default)]
pub struct MemoryDependencyStore {
    entries: RwLock<HashMap<String, Vec<MissingDependency>>>,
}

impl MemoryDependencyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with waiters.
    pub fn key_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl DependencyStore for MemoryDependencyStore {
    fn get(&self, key: &str) -> SyncResult<Vec<MissingDependency>> {
        Ok(self.entries.read().get(key).cloned().unwrap_or_default())
    }

    fn set(&self, key: &str, entries: Vec<MissingDependency>) -> SyncResult<()> {
        self.entries.write().insert(key.to_string(), entries);
        Ok(())
    }

    fn delete(&self, key: &str) -> SyncResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Files and claims missing-dependency entries on top of a [`DependencyStore`].
pub struct MissingDependencies {
    store: Arc<dyn DependencyStore>,
    lock: Mutex<()>,
}

impl MissingDependencies {
    /// Wraps a store.
    pub fn new(store: Arc<dyn DependencyStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Files `entry` as waiting on `target`.
    ///
    /// Returns false if the same waiter was already filed for the same field.
    pub fn file(&self, target: &ItemRef, entry: MissingDependency) -> SyncResult<bool> {
        let key = target.dependency_key();
        let _guard = self.lock.lock();
        let mut entries = self.store.get(&key)?;
        if entries.iter().any(|e| e.duplicates(&entry)) {
            return Ok(false);
        }
        entries.push(entry);
        self.store.set(&key, entries)?;
        Ok(true)
    }

    /// Removes and returns every entry under `key`.
    ///
    /// Two concurrent callers never both receive the same entry.
    pub fn take(&self, key: &str) -> SyncResult<Vec<MissingDependency>> {
        let _guard = self.lock.lock();
        let entries = self.store.get(key)?;
        if !entries.is_empty() {
            self.store.delete(key)?;
        }
        Ok(entries)
    }

    /// Entries under `key`, left in place.
    pub fn pending(&self, key: &str) -> SyncResult<Vec<MissingDependency>> {
        self.store.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term() -> ItemRef {
        ItemRef::new("taxonomy_term", "tags", "t1")
    }

    fn article(uuid: &str) -> ItemRef {
        ItemRef::new("node", "article", uuid)
    }

    fn deps() -> MissingDependencies {
        MissingDependencies::new(Arc::new(MemoryDependencyStore::new()))
    }

    #[test]
    fn duplicate_waiter_is_filed_once() {
        let deps = deps();
        let entry = MissingDependency::field(article("n1"), PullReason::Automatic, "tags");

        assert!(deps.file(&term(), entry.clone()).unwrap());
        assert!(!deps.file(&term(), entry).unwrap());
        assert_eq!(deps.pending("taxonomy_term:t1").unwrap().len(), 1);
    }

    #[test]
    fn same_waiter_other_field_is_kept() {
        let deps = deps();
        deps.file(
            &term(),
            MissingDependency::field(article("n1"), PullReason::Automatic, "tags"),
        )
        .unwrap();
        deps.file(
            &term(),
            MissingDependency::field(article("n1"), PullReason::Automatic, "category"),
        )
        .unwrap();
        deps.file(
            &term(),
            MissingDependency::repull(article("n2"), PullReason::Manual),
        )
        .unwrap();

        assert_eq!(deps.pending("taxonomy_term:t1").unwrap().len(), 3);
    }

    #[test]
    fn take_empties_the_key() {
        let deps = deps();
        deps.file(
            &term(),
            MissingDependency::repull(article("n1"), PullReason::Automatic),
        )
        .unwrap();

        let taken = deps.take("taxonomy_term:t1").unwrap();
        assert_eq!(taken.len(), 1);
        assert!(deps.take("taxonomy_term:t1").unwrap().is_empty());
    }

    #[test]
    fn concurrent_take_hands_out_each_entry_once() {
        let deps = Arc::new(deps());
        for i in 0..50 {
            deps.file(
                &term(),
                MissingDependency::repull(article(&format!("n{i}")), PullReason::Automatic),
            )
            .unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let deps = Arc::clone(&deps);
                std::thread::spawn(move || deps.take("taxonomy_term:t1").unwrap().len())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
    }
}
