//! Local content items and their storage boundary.

use crate::error::SyncResult;
use contentsync_protocol::{ItemRef, PropertyMap, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// A content item as stored on this site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalItem {
    /// Cross-site identity.
    pub reference: ItemRef,
    /// Storage id on this site, assigned on first save.
    pub id: Option<u64>,
    /// Own change timestamp (unix seconds).
    pub changed: i64,
    /// Base-language field values.
    pub fields: PropertyMap,
    /// Field values by language code.
    pub translations: BTreeMap<String, PropertyMap>,
}

impl LocalItem {
    /// Creates an unsaved item with no fields.
    pub fn new(reference: ItemRef, changed: i64) -> Self {
        Self {
            reference,
            id: None,
            changed,
            fields: PropertyMap::new(),
            translations: BTreeMap::new(),
        }
    }

    /// Sets a base-language field.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Sets a translated field.
    pub fn with_translation(
        mut self,
        language: impl Into<String>,
        name: impl Into<String>,
        value: Value,
    ) -> Self {
        self.translations
            .entry(language.into())
            .or_default()
            .insert(name.into(), value);
        self
    }

    /// Reads a field of the base language (`None`) or a translation.
    pub fn field(&self, language: Option<&str>, name: &str) -> Option<&Value> {
        match language {
            None => self.fields.get(name),
            Some(lang) => self.translations.get(lang).and_then(|f| f.get(name)),
        }
    }

    /// Writes a field of the base language (`None`) or a translation.
    pub fn set_field(&mut self, language: Option<&str>, name: impl Into<String>, value: Value) {
        match language {
            None => {
                self.fields.insert(name.into(), value);
            }
            Some(lang) => {
                self.translations
                    .entry(lang.to_string())
                    .or_default()
                    .insert(name.into(), value);
            }
        }
    }

    /// Fields of the base language (`None`) or a translation.
    pub fn fields_in(&self, language: Option<&str>) -> Option<&PropertyMap> {
        match language {
            None => Some(&self.fields),
            Some(lang) => self.translations.get(lang),
        }
    }

    /// Languages with translated fields.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.translations.keys().map(String::as_str)
    }
}

/// Local content storage.
pub trait ContentRepository: Send + Sync {
    /// Loads the item with the same type and identifier as `item`.
    fn load(&self, item: &ItemRef) -> SyncResult<Option<LocalItem>>;

    /// Inserts or replaces an item, assigning a storage id if it has none.
    fn save(&self, item: &mut LocalItem) -> SyncResult<()>;

    /// Removes an item; returns false if it did not exist.
    fn delete(&self, item: &ItemRef) -> SyncResult<bool>;
}

/// An in-memory content repository.
#[derive(Debug)]
pub struct MemoryContentRepository {
    items: RwLock<HashMap<(String, String), LocalItem>>,
    next_id: AtomicU64,
}

impl MemoryContentRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn key(item: &ItemRef) -> (String, String) {
        (item.entity_type.clone(), item.identifier().to_string())
    }
}

impl Default for MemoryContentRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentRepository for MemoryContentRepository {
    fn load(&self, item: &ItemRef) -> SyncResult<Option<LocalItem>> {
        Ok(self.items.read().get(&Self::key(item)).cloned())
    }

    fn save(&self, item: &mut LocalItem) -> SyncResult<()> {
        let mut items = self.items.write();
        let key = Self::key(&item.reference);
        if item.id.is_none() {
            item.id = items
                .get(&key)
                .and_then(|existing| existing.id)
                .or_else(|| Some(self.next_id.fetch_add(1, Ordering::SeqCst)));
        }
        items.insert(key, item.clone());
        Ok(())
    }

    fn delete(&self, item: &ItemRef) -> SyncResult<bool> {
        Ok(self.items.write().remove(&Self::key(item)).is_some())
    }
}
