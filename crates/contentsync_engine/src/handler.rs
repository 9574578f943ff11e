//! Type handlers, the handler registry and change-time resolvers.

use crate::content::{ContentRepository, LocalItem};
use crate::error::{SyncError, SyncResult};
use crate::pull::PullIntent;
use crate::push::PushIntent;
use contentsync_protocol::{content_hash, ItemRef, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Bundle wildcard for handlers and policy rules.
pub const ANY_BUNDLE: &str = "*";

/// Description of a type's replicated fields.
///
/// The hash of the definition is the entity-type version stored on status
/// records; any change to it invalidates earlier push/pull comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Entity type.
    pub entity_type: String,
    /// Bundle.
    pub bundle: String,
    /// Field name to handler-defined field settings.
    pub fields: BTreeMap<String, Value>,
    /// Fields that are never replicated.
    pub forbidden_fields: Vec<String>,
}

impl TypeDefinition {
    /// Creates an empty definition.
    pub fn new(entity_type: impl Into<String>, bundle: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            fields: BTreeMap::new(),
            forbidden_fields: Vec::new(),
        }
    }

    /// Adds or replaces a field.
    pub fn add_field(&mut self, name: impl Into<String>, settings: Value) {
        self.fields.insert(name.into(), settings);
    }

    /// Version hash of this definition.
    pub fn version(&self) -> SyncResult<String> {
        Ok(content_hash(self)?)
    }
}

/// Serializes and applies one entity type.
///
/// Returning `Ok(false)` from [`push`](EntityHandler::push) or
/// [`pull`](EntityHandler::pull) is a policy decline, not an error.
pub trait EntityHandler: Send + Sync {
    /// Fills the intent's operation from the bound local item.
    fn push(&self, intent: &mut PushIntent<'_>) -> SyncResult<bool>;

    /// Creates, updates or deletes the local item from the operation.
    fn pull(&self, intent: &mut PullIntent<'_>) -> SyncResult<bool>;

    /// Returns true to skip the push without recording anything.
    fn ignore_push(&self, _intent: &PushIntent<'_>) -> bool {
        false
    }

    /// Returns true to skip the pull without recording anything.
    fn ignore_pull(&self, _intent: &PullIntent<'_>) -> bool {
        false
    }

    /// Fields that are never replicated.
    fn forbidden_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Adds this handler's field settings to the type definition.
    fn update_type_definition(&self, _definition: &mut TypeDefinition) {}

    /// Points `field` of a waiting item at a newly available item.
    ///
    /// The default stores the target's identity; list-valued fields get it
    /// appended once.
    fn link_field(
        &self,
        waiting: &mut LocalItem,
        field: &str,
        target: &LocalItem,
        _custom_data: Option<&BTreeMap<String, Value>>,
    ) -> SyncResult<()> {
        let value = serde_json::to_value(&target.reference)
            .map_err(|e| SyncError::data(format!("cannot encode reference: {e}")))?;
        match waiting.fields.get_mut(field) {
            Some(Value::Array(values)) => {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            _ => waiting.set_field(None, field, value),
        }
        Ok(())
    }
}

/// Computes the effective change time of an item before it is pushed.
pub trait ChangeTimeResolver: Send + Sync {
    /// Change time to compare and record; never earlier than `item.changed`.
    fn change_time(&self, item: &LocalItem, content: &dyn ContentRepository) -> SyncResult<i64>;
}

/// Uses the item's own change timestamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnChangeTime;

impl ChangeTimeResolver for OwnChangeTime {
    fn change_time(&self, item: &LocalItem, _content: &dyn ContentRepository) -> SyncResult<i64> {
        Ok(item.changed)
    }
}

/// Folds in the change times of file items referenced from given fields.
///
/// Crop and focal-point edits are stored on the file item under
/// `metadata_field` and do not bump either item's `changed`.
#[derive(Debug, Clone)]
pub struct EmbeddedFileChangeTime {
    fields: Vec<String>,
    metadata_field: String,
}

impl EmbeddedFileChangeTime {
    /// Watches `fields`; file metadata time is read from `crop_changed`.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            metadata_field: "crop_changed".to_string(),
        }
    }

    /// Reads the file metadata time from another field.
    pub fn with_metadata_field(mut self, field: impl Into<String>) -> Self {
        self.metadata_field = field.into();
        self
    }

    fn file_refs(value: &Value) -> Vec<ItemRef> {
        match value {
            Value::Array(values) => values.iter().filter_map(Self::file_ref).collect(),
            other => Self::file_ref(other).into_iter().collect(),
        }
    }

    fn file_ref(value: &Value) -> Option<ItemRef> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl ChangeTimeResolver for EmbeddedFileChangeTime {
    fn change_time(&self, item: &LocalItem, content: &dyn ContentRepository) -> SyncResult<i64> {
        let mut changed = item.changed;
        for field in &self.fields {
            let Some(value) = item.field(None, field) else {
                continue;
            };
            for file in Self::file_refs(value) {
                if let Some(local) = content.load(&file)? {
                    changed = changed.max(local.changed);
                    if let Some(meta) = local.field(None, &self.metadata_field).and_then(Value::as_i64) {
                        changed = changed.max(meta);
                    }
                }
            }
        }
        Ok(changed)
    }
}

/// Maps `(entity_type, bundle)` to handlers, built once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn EntityHandler>>,
    change_times: HashMap<String, Arc<dyn ChangeTimeResolver>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; use [`ANY_BUNDLE`] to cover every bundle.
    pub fn register(
        mut self,
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        handler: Arc<dyn EntityHandler>,
    ) -> Self {
        self.handlers
            .insert((entity_type.into(), bundle.into()), handler);
        self
    }

    /// Registers a change-time resolver for every bundle of a type.
    pub fn register_change_time(
        mut self,
        entity_type: impl Into<String>,
        resolver: Arc<dyn ChangeTimeResolver>,
    ) -> Self {
        self.change_times.insert(entity_type.into(), resolver);
        self
    }

    /// Returns true if some handler covers the type and bundle.
    pub fn supports(&self, entity_type: &str, bundle: &str) -> bool {
        self.lookup(entity_type, bundle).is_some()
    }

    fn lookup(&self, entity_type: &str, bundle: &str) -> Option<&Arc<dyn EntityHandler>> {
        self.handlers
            .get(&(entity_type.to_string(), bundle.to_string()))
            .or_else(|| {
                self.handlers
                    .get(&(entity_type.to_string(), ANY_BUNDLE.to_string()))
            })
    }

    /// The handler for a type and bundle.
    pub fn handler(&self, entity_type: &str, bundle: &str) -> SyncResult<Arc<dyn EntityHandler>> {
        self.lookup(entity_type, bundle)
            .cloned()
            .ok_or_else(|| SyncError::NoHandler {
                entity_type: entity_type.to_string(),
                bundle: bundle.to_string(),
            })
    }

    /// The change-time resolver for a type.
    pub fn change_time(&self, entity_type: &str) -> Arc<dyn ChangeTimeResolver> {
        self.change_times
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(OwnChangeTime))
    }

    /// Builds the type definition by asking the handler to fill it.
    pub fn type_definition(&self, entity_type: &str, bundle: &str) -> SyncResult<TypeDefinition> {
        let handler = self.handler(entity_type, bundle)?;
        let mut definition = TypeDefinition::new(entity_type, bundle);
        definition.forbidden_fields = handler.forbidden_fields();
        definition.forbidden_fields.sort();
        handler.update_type_definition(&mut definition);
        Ok(definition)
    }

    /// Current entity-type version.
    pub fn type_version(&self, entity_type: &str, bundle: &str) -> SyncResult<String> {
        self.type_definition(entity_type, bundle)?.version()
    }

    /// Every registered (type, bundle) pair, sorted.
    pub fn registered_types(&self) -> Vec<(String, String)> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContentRepository;
    use serde_json::json;

    struct Noop {
        forbidden: Vec<String>,
        extra_field: Option<&'static str>,
    }

    impl EntityHandler for Noop {
        fn push(&self, _intent: &mut PushIntent<'_>) -> SyncResult<bool> {
            Ok(true)
        }

        fn pull(&self, _intent: &mut PullIntent<'_>) -> SyncResult<bool> {
            Ok(true)
        }

        fn forbidden_fields(&self) -> Vec<String> {
            self.forbidden.clone()
        }

        fn update_type_definition(&self, definition: &mut TypeDefinition) {
            definition.add_field("title", json!({"type": "string"}));
            if let Some(name) = self.extra_field {
                definition.add_field(name, json!({"type": "string"}));
            }
        }
    }

    fn noop(extra_field: Option<&'static str>) -> Arc<dyn EntityHandler> {
        Arc::new(Noop {
            forbidden: vec!["revision_log".into()],
            extra_field,
        })
    }

    #[test]
    fn exact_bundle_beats_wildcard() {
        let registry = HandlerRegistry::new()
            .register("node", ANY_BUNDLE, noop(None))
            .register("node", "page", noop(Some("body")));

        let any = registry.type_version("node", "article").unwrap();
        let page = registry.type_version("node", "page").unwrap();
        assert_ne!(any, page);
        assert!(registry.supports("node", "blog"));
        assert!(!registry.supports("media", "image"));
    }

    #[test]
    fn missing_handler_is_an_error() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.handler("node", "article"),
            Err(SyncError::NoHandler { .. })
        ));
    }

    #[test]
    fn version_is_stable_and_tracks_fields() {
        let a = HandlerRegistry::new().register("node", "article", noop(None));
        let b = HandlerRegistry::new().register("node", "article", noop(None));
        let c = HandlerRegistry::new().register("node", "article", noop(Some("summary")));

        let va = a.type_version("node", "article").unwrap();
        assert_eq!(va, b.type_version("node", "article").unwrap());
        assert_ne!(va, c.type_version("node", "article").unwrap());

        let definition = a.type_definition("node", "article").unwrap();
        assert_eq!(definition.forbidden_fields, vec!["revision_log".to_string()]);
    }

    #[test]
    fn default_link_field_sets_or_appends() {
        let target = LocalItem::new(ItemRef::new("taxonomy_term", "tags", "t1"), 1);
        let mut single = LocalItem::new(ItemRef::new("node", "article", "n1"), 1);
        let mut list = LocalItem::new(ItemRef::new("node", "article", "n2"), 1)
            .with_field("tags", json!([]));
        let handler = noop(None);

        handler.link_field(&mut single, "category", &target, None).unwrap();
        handler.link_field(&mut list, "tags", &target, None).unwrap();
        handler.link_field(&mut list, "tags", &target, None).unwrap();

        let expected = serde_json::to_value(&target.reference).unwrap();
        assert_eq!(single.field(None, "category"), Some(&expected));
        assert_eq!(list.field(None, "tags"), Some(&json!([expected])));
    }

    #[test]
    fn embedded_file_change_time_uses_crop_metadata() {
        let repo = MemoryContentRepository::new();
        let file_ref = ItemRef::new("file", "file", "f1");
        let mut file = LocalItem::new(file_ref.clone(), 150).with_field("crop_changed", json!(300));
        repo.save(&mut file).unwrap();

        let media = LocalItem::new(ItemRef::new("media", "image", "m1"), 200)
            .with_field("image", serde_json::to_value(&file_ref).unwrap());

        let resolver = EmbeddedFileChangeTime::new(["image"]);
        assert_eq!(resolver.change_time(&media, &repo).unwrap(), 300);
        assert_eq!(OwnChangeTime.change_time(&media, &repo).unwrap(), 200);
    }

    #[test]
    fn embedded_file_change_time_never_goes_below_own_time() {
        let repo = MemoryContentRepository::new();
        let file_ref = ItemRef::new("file", "file", "f1");
        let mut file = LocalItem::new(file_ref.clone(), 50);
        repo.save(&mut file).unwrap();

        let media = LocalItem::new(ItemRef::new("media", "image", "m1"), 200)
            .with_field("image", json!([serde_json::to_value(&file_ref).unwrap()]));
        let resolver = EmbeddedFileChangeTime::new(vec!["image".to_string()]);
        assert_eq!(resolver.change_time(&media, &repo).unwrap(), 200);
    }
}
