//! Status ledger: per (item, channel) replication state.

use crate::error::SyncResult;
use contentsync_protocol::{Channel, ItemRef, SyncAction, Value};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Key of one status record: `entity_type:uuid:policy_id:pool_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusKey(String);

impl StatusKey {
    /// Builds the key for an item on a channel.
    pub fn new(item: &ItemRef, channel: &Channel) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            item.entity_type, item.uuid, channel.policy_id, channel.pool_id
        ))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a recorded failure is a policy verdict or a real error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Handler declined or content unchanged.
    Soft,
    /// Backend, data or storage error.
    Hard,
}

/// The last failure in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Soft or hard.
    pub kind: FailureKind,
    /// Skip reason or error message.
    pub reason: String,
    /// When it was recorded (unix seconds).
    pub at: i64,
}

/// Replication state of one item on one channel.
///
/// # Invariants
///
/// - `last_push` and `last_pull` only move forward
/// - `is_deleted` stays set until a later create clears it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    item: ItemRef,
    channel: Channel,
    entity_type_version: String,
    last_push: Option<i64>,
    last_pull: Option<i64>,
    #[serde(default)]
    pulled_change: Option<i64>,
    push_hash: Option<String>,
    is_source_entity: bool,
    is_deleted: bool,
    pushed_as_dependency: bool,
    pushed_embedded: bool,
    pulled_embedded: bool,
    parent: Option<ItemRef>,
    manual_push_enabled: bool,
    overridden_locally: bool,
    last_push_failure: Option<Failure>,
    last_pull_failure: Option<Failure>,
    #[serde(default)]
    data: BTreeMap<String, Value>,
}

impl StatusRecord {
    /// A record with no history.
    pub fn new(item: ItemRef, channel: Channel, entity_type_version: impl Into<String>) -> Self {
        Self {
            item,
            channel,
            entity_type_version: entity_type_version.into(),
            last_push: None,
            last_pull: None,
            pulled_change: None,
            push_hash: None,
            is_source_entity: false,
            is_deleted: false,
            pushed_as_dependency: false,
            pushed_embedded: false,
            pulled_embedded: false,
            parent: None,
            manual_push_enabled: false,
            overridden_locally: false,
            last_push_failure: None,
            last_pull_failure: None,
            data: BTreeMap::new(),
        }
    }

    /// Ledger key of this record.
    pub fn key(&self) -> StatusKey {
        StatusKey::new(&self.item, &self.channel)
    }

    /// The item.
    pub fn item(&self) -> &ItemRef {
        &self.item
    }

    /// The channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Entity-type version as of the last successful sync.
    pub fn entity_type_version(&self) -> &str {
        &self.entity_type_version
    }

    /// Last successful push.
    pub fn last_push(&self) -> Option<i64> {
        self.last_push
    }

    /// Last successful pull.
    pub fn last_pull(&self) -> Option<i64> {
        self.last_pull
    }

    /// Remote change time of the newest operation applied by a pull.
    pub fn pulled_change(&self) -> Option<i64> {
        self.pulled_change
    }

    /// Content hash as of the last successful push.
    pub fn push_hash(&self) -> Option<&str> {
        self.push_hash.as_deref()
    }

    /// True if this site originated the item and never pulled it.
    pub fn is_source_entity(&self) -> bool {
        self.is_source_entity
    }

    /// True once a delete was pushed or pulled.
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// True if the last push happened as someone else's dependency.
    pub fn pushed_as_dependency(&self) -> bool {
        self.pushed_as_dependency
    }

    /// True if the item was last pushed inside its parent.
    pub fn pushed_embedded(&self) -> bool {
        self.pushed_embedded
    }

    /// True if the item was last pulled inside its parent.
    pub fn pulled_embedded(&self) -> bool {
        self.pulled_embedded
    }

    /// Parent item for embedded records.
    pub fn parent(&self) -> Option<&ItemRef> {
        self.parent.as_ref()
    }

    /// Editor enabled manual pushing on this channel.
    pub fn manual_push_enabled(&self) -> bool {
        self.manual_push_enabled
    }

    /// Item was edited locally after being pulled.
    pub fn overridden_locally(&self) -> bool {
        self.overridden_locally
    }

    /// Last push failure, cleared by the next successful push.
    pub fn last_push_failure(&self) -> Option<&Failure> {
        self.last_push_failure.as_ref()
    }

    /// Last pull failure, cleared by the next successful pull.
    pub fn last_pull_failure(&self) -> Option<&Failure> {
        self.last_pull_failure.as_ref()
    }

    /// True if the channel has a live push history.
    pub fn has_push_history(&self) -> bool {
        self.last_push.is_some() && !self.is_deleted
    }

    /// True if the channel has a live pull history.
    pub fn has_pull_history(&self) -> bool {
        self.last_pull.is_some() && !self.is_deleted
    }

    /// Handler scratch data.
    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Stores handler scratch data.
    pub fn set_data(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Records a successful push.
    pub fn mark_pushed(
        &mut self,
        at: i64,
        hash: String,
        version: &str,
        action: SyncAction,
        as_dependency: bool,
    ) {
        self.last_push = Some(self.last_push.map_or(at, |prev| prev.max(at)));
        self.push_hash = Some(hash);
        self.entity_type_version = version.to_string();
        self.pushed_as_dependency = as_dependency;
        self.pushed_embedded = false;
        self.parent = None;
        self.last_push_failure = None;
        self.apply_action(action);
        if self.last_pull.is_none() {
            self.is_source_entity = true;
        }
    }

    /// Records a successful push inside `parent`.
    pub fn mark_pushed_embedded(
        &mut self,
        at: i64,
        hash: String,
        version: &str,
        action: SyncAction,
        parent: ItemRef,
    ) {
        self.mark_pushed(at, hash, version, action, false);
        self.pushed_embedded = true;
        self.parent = Some(parent);
    }

    /// Records a successful pull of an operation changed at `changed`.
    pub fn mark_pulled(
        &mut self,
        at: i64,
        changed: i64,
        version: &str,
        action: SyncAction,
        parent: Option<ItemRef>,
    ) {
        self.last_pull = Some(self.last_pull.map_or(at, |prev| prev.max(at)));
        self.pulled_change = Some(self.pulled_change.map_or(changed, |prev| prev.max(changed)));
        self.entity_type_version = version.to_string();
        self.is_source_entity = false;
        self.pulled_embedded = parent.is_some();
        if parent.is_some() {
            self.parent = parent;
        }
        self.last_pull_failure = None;
        self.apply_action(action);
    }

    fn apply_action(&mut self, action: SyncAction) {
        match action {
            SyncAction::Delete => self.is_deleted = true,
            SyncAction::Create => self.is_deleted = false,
            SyncAction::Update => {}
        }
    }

    /// Records a push failure.
    pub fn set_push_failure(&mut self, kind: FailureKind, reason: impl Into<String>, at: i64) {
        self.last_push_failure = Some(Failure {
            kind,
            reason: reason.into(),
            at,
        });
    }

    /// Records a pull failure.
    pub fn set_pull_failure(&mut self, kind: FailureKind, reason: impl Into<String>, at: i64) {
        self.last_pull_failure = Some(Failure {
            kind,
            reason: reason.into(),
            at,
        });
    }

    /// Sets the manual push flag.
    pub fn set_manual_push_enabled(&mut self, enabled: bool) {
        self.manual_push_enabled = enabled;
    }

    /// Sets the local override flag.
    pub fn set_overridden_locally(&mut self, overridden: bool) {
        self.overridden_locally = overridden;
    }
}

/// Persistence for status records.
///
/// Implementations only need exact-key lookups. `create` must not replace
/// an existing record.
pub trait StatusStore: Send + Sync {
    /// Loads a record.
    fn get(&self, key: &StatusKey) -> SyncResult<Option<StatusRecord>>;

    /// Inserts a record if none exists under its key; returns the stored one.
    fn create(&self, record: StatusRecord) -> SyncResult<StatusRecord>;

    /// Overwrites a record.
    fn save(&self, record: &StatusRecord) -> SyncResult<()>;

    /// High-water pull timestamp of a pool.
    fn pool_watermark(&self, pool_id: &str) -> SyncResult<Option<i64>>;

    /// Stores the high-water pull timestamp of a pool.
    fn set_pool_watermark(&self, pool_id: &str, at: i64) -> SyncResult<()>;
}

/// An in-memory status store.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<StatusKey, StatusRecord>>,
    watermarks: RwLock<HashMap<String, i64>>,
}

impl MemoryStatusStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get(&self, key: &StatusKey) -> SyncResult<Option<StatusRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn create(&self, record: StatusRecord) -> SyncResult<StatusRecord> {
        let mut records = self.records.write();
        Ok(records.entry(record.key()).or_insert(record).clone())
    }

    fn save(&self, record: &StatusRecord) -> SyncResult<()> {
        self.records.write().insert(record.key(), record.clone());
        Ok(())
    }

    fn pool_watermark(&self, pool_id: &str) -> SyncResult<Option<i64>> {
        Ok(self.watermarks.read().get(pool_id).copied())
    }

    fn set_pool_watermark(&self, pool_id: &str, at: i64) -> SyncResult<()> {
        self.watermarks.write().insert(pool_id.to_string(), at);
        Ok(())
    }
}

/// Serializes read-mutate-write cycles on top of a [`StatusStore`].
pub struct StatusLedger {
    store: Arc<dyn StatusStore>,
    write_lock: Mutex<()>,
}

impl StatusLedger {
    /// Wraps a store.
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Looks up a record without creating it.
    pub fn get(&self, item: &ItemRef, channel: &Channel) -> SyncResult<Option<StatusRecord>> {
        self.store.get(&StatusKey::new(item, channel))
    }

    /// Looks up a record, creating an empty one on first use.
    pub fn get_or_create(
        &self,
        item: &ItemRef,
        channel: &Channel,
        version: &str,
    ) -> SyncResult<StatusRecord> {
        let _guard = self.write_lock.lock();
        self.get_or_create_locked(item, channel, version)
    }

    fn get_or_create_locked(
        &self,
        item: &ItemRef,
        channel: &Channel,
        version: &str,
    ) -> SyncResult<StatusRecord> {
        if let Some(record) = self.store.get(&StatusKey::new(item, channel))? {
            return Ok(record);
        }
        self.store
            .create(StatusRecord::new(item.clone(), channel.clone(), version))
    }

    /// Applies `mutate` to the current record and saves it as one unit.
    pub fn update<F>(
        &self,
        item: &ItemRef,
        channel: &Channel,
        version: &str,
        mutate: F,
    ) -> SyncResult<StatusRecord>
    where
        F: FnOnce(&mut StatusRecord),
    {
        let _guard = self.write_lock.lock();
        let mut record = self.get_or_create_locked(item, channel, version)?;
        mutate(&mut record);
        self.store.save(&record)?;
        Ok(record)
    }

    /// High-water pull timestamp of a pool.
    pub fn pool_watermark(&self, pool_id: &str) -> SyncResult<Option<i64>> {
        self.store.pool_watermark(pool_id)
    }

    /// Moves a pool's watermark forward; older timestamps are ignored.
    pub fn advance_pool_watermark(&self, pool_id: &str, at: i64) -> SyncResult<i64> {
        let _guard = self.write_lock.lock();
        let current = self.store.pool_watermark(pool_id)?;
        match current {
            Some(prev) if prev >= at => Ok(prev),
            _ => {
                self.store.set_pool_watermark(pool_id, at)?;
                Ok(at)
            }
        }
    }
}
