//! Push and pull operations.

use crate::action::SyncAction;
use crate::error::ProtocolResult;
use crate::hash::content_hash;
use crate::item::{Channel, ItemRef};
use crate::reference::{EntityReference, ReferenceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Named properties of one language of an item.
pub type PropertyMap = BTreeMap<String, Value>;

/// An outgoing operation, populated by a type handler and sent to the backend.
///
/// # Fields
///
/// - `properties`: base-language values
/// - `translations`: per-language values
/// - `references`: every link the handler added, of any strength
/// - `embedded`: full operations of embedded items, sent inside this one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushOperation {
    /// Item being pushed.
    pub item: ItemRef,
    /// Action after create/update inference.
    pub action: SyncAction,
    /// Entity-type version the operation addresses.
    pub entity_type_version: String,
    /// Channel the operation is sent over.
    pub channel: Channel,
    /// Site that produced the operation.
    pub source_site: String,
    /// Effective change time of the item (unix seconds).
    pub changed: i64,
    /// Base-language properties.
    pub properties: PropertyMap,
    /// Properties by language code.
    pub translations: BTreeMap<String, PropertyMap>,
    /// Links to other items.
    pub references: Vec<EntityReference>,
    /// Embedded item operations.
    pub embedded: Vec<PushOperation>,
}

/// The parts of an operation that decide whether content changed.
///
/// Action, version, channel and source site are left out: a create followed
/// by an identical update must hash equal.
#[derive(Serialize)]
struct HashInput<'a> {
    entity_type: &'a str,
    bundle: &'a str,
    identifier: &'a str,
    changed: i64,
    properties: &'a PropertyMap,
    translations: &'a BTreeMap<String, PropertyMap>,
    references: Vec<(&'a str, String, ReferenceKind, Option<&'a str>)>,
    embedded: Vec<String>,
}

impl PushOperation {
    /// Creates an empty operation.
    pub fn new(
        item: ItemRef,
        channel: Channel,
        action: SyncAction,
        entity_type_version: impl Into<String>,
        source_site: impl Into<String>,
    ) -> Self {
        Self {
            item,
            action,
            entity_type_version: entity_type_version.into(),
            channel,
            source_site: source_site.into(),
            changed: 0,
            properties: PropertyMap::new(),
            translations: BTreeMap::new(),
            references: Vec::new(),
            embedded: Vec::new(),
        }
    }

    /// Sets a property in the base language (`None`) or a translation.
    pub fn set_property(&mut self, language: Option<&str>, name: impl Into<String>, value: Value) {
        match language {
            None => {
                self.properties.insert(name.into(), value);
            }
            Some(lang) => {
                self.translations
                    .entry(lang.to_string())
                    .or_default()
                    .insert(name.into(), value);
            }
        }
    }

    /// Gets a property in the base language (`None`) or a translation.
    pub fn property(&self, language: Option<&str>, name: &str) -> Option<&Value> {
        match language {
            None => self.properties.get(name),
            Some(lang) => self.translations.get(lang).and_then(|p| p.get(name)),
        }
    }

    /// Records a link, replacing a weaker or older link to the same item.
    pub fn add_reference(&mut self, reference: EntityReference) {
        if let Some(existing) = self
            .references
            .iter_mut()
            .find(|r| r.item.same_item(&reference.item))
        {
            if reference.kind != ReferenceKind::Reference || existing.kind == ReferenceKind::Reference
            {
                *existing = reference;
            }
            return;
        }
        self.references.push(reference);
    }

    /// Links of the given strength.
    pub fn references_of(&self, kind: ReferenceKind) -> impl Iterator<Item = &EntityReference> {
        self.references.iter().filter(move |r| r.kind == kind)
    }

    /// Content fingerprint including the hashes of linked items.
    pub fn hash(&self) -> ProtocolResult<String> {
        let mut references: Vec<_> = self
            .references
            .iter()
            .map(|r| {
                (
                    r.item.entity_type.as_str(),
                    r.item.identifier().to_string(),
                    r.kind,
                    r.hash.as_deref(),
                )
            })
            .collect();
        references.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let embedded = self
            .embedded
            .iter()
            .map(PushOperation::hash)
            .collect::<ProtocolResult<Vec<_>>>()?;

        content_hash(&HashInput {
            entity_type: &self.item.entity_type,
            bundle: &self.item.bundle,
            identifier: self.item.identifier(),
            changed: self.changed,
            properties: &self.properties,
            translations: &self.translations,
            references,
            embedded,
        })
    }
}

/// An incoming operation delivered by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullOperation {
    /// Item being pulled.
    pub item: ItemRef,
    /// Action as sent by the origin; the pull side re-infers create/update.
    pub action: SyncAction,
    /// Entity-type version of the origin.
    pub entity_type_version: String,
    /// Site the content originated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_site: Option<String>,
    /// Change time at the origin (unix seconds).
    pub changed: i64,
    /// Base-language properties.
    pub properties: PropertyMap,
    /// Properties by language code.
    #[serde(default)]
    pub translations: BTreeMap<String, PropertyMap>,
    /// Embedded item operations.
    #[serde(default)]
    pub embedded: Vec<PullOperation>,
}

impl PullOperation {
    /// Creates an operation with no properties.
    pub fn new(item: ItemRef, action: SyncAction, changed: i64) -> Self {
        Self {
            item,
            action,
            entity_type_version: String::new(),
            source_site: None,
            changed,
            properties: PropertyMap::new(),
            translations: BTreeMap::new(),
            embedded: Vec::new(),
        }
    }

    /// Sets a base-language property.
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Sets a property of one translation.
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

    /// Adds an embedded operation.
    pub fn with_embedded(mut self, embedded: PullOperation) -> Self {
        self.embedded.push(embedded);
        self
    }

    /// Gets a property in the base language (`None`) or a translation.
    pub fn property(&self, language: Option<&str>, name: &str) -> Option<&Value> {
        match language {
            None => self.properties.get(name),
            Some(lang) => self.translations.get(lang).and_then(|p| p.get(name)),
        }
    }

    /// Languages with translated properties.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.translations.keys().map(String::as_str)
    }

    /// The embedded operation for `item`, if it was sent inline.
    pub fn embedded_for(&self, item: &ItemRef) -> Option<&PullOperation> {
        self.embedded.iter().find(|op| op.item.same_item(item))
    }
}

impl From<PushOperation> for PullOperation {
    fn from(op: PushOperation) -> Self {
        Self {
            item: op.item,
            action: op.action,
            entity_type_version: op.entity_type_version,
            source_site: Some(op.source_site),
            changed: op.changed,
            properties: op.properties,
            translations: op.translations,
            embedded: op.embedded.into_iter().map(PullOperation::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_op(action: SyncAction) -> PushOperation {
        let mut op = PushOperation::new(
            ItemRef::new("node", "article", "n1"),
            Channel::new("content", "main"),
            action,
            "v1",
            "site-a",
        );
        op.changed = 100;
        op.set_property(None, "title", json!("Hello"));
        op
    }

    #[test]
    fn hash_ignores_action_and_version() {
        let create = node_op(SyncAction::Create);
        let mut update = node_op(SyncAction::Update);
        update.entity_type_version = "v2".into();
        assert_eq!(create.hash().unwrap(), update.hash().unwrap());
    }

    #[test]
    fn hash_covers_translations_and_change_time() {
        let base = node_op(SyncAction::Create);

        let mut translated = base.clone();
        translated.set_property(Some("de"), "title", json!("Hallo"));
        assert_ne!(base.hash().unwrap(), translated.hash().unwrap());

        let mut touched = base.clone();
        touched.changed = 101;
        assert_ne!(base.hash().unwrap(), touched.hash().unwrap());
    }

    #[test]
    fn hash_covers_dependency_hashes() {
        let term = ItemRef::new("taxonomy_term", "tags", "t1");
        let mut a = node_op(SyncAction::Create);
        a.add_reference(EntityReference {
            kind: ReferenceKind::Dependency,
            item: term.clone(),
            pool_id: Some("main".into()),
            hash: Some("h1".into()),
        });
        let mut b = node_op(SyncAction::Create);
        b.add_reference(EntityReference {
            kind: ReferenceKind::Dependency,
            item: term,
            pool_id: Some("main".into()),
            hash: Some("h2".into()),
        });
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn stronger_reference_wins() {
        let term = ItemRef::new("taxonomy_term", "tags", "t1");
        let mut op = node_op(SyncAction::Create);
        op.add_reference(EntityReference::bare(term.clone()));
        op.add_reference(EntityReference {
            kind: ReferenceKind::Dependency,
            item: term.clone(),
            pool_id: None,
            hash: Some("h".into()),
        });
        op.add_reference(EntityReference::bare(term));
        assert_eq!(op.references.len(), 1);
        assert_eq!(op.references[0].kind, ReferenceKind::Dependency);
    }

    #[test]
    fn pull_from_push_keeps_payload() {
        let mut push = node_op(SyncAction::Create);
        push.set_property(Some("fr"), "title", json!("Bonjour"));
        let pull = PullOperation::from(push);
        assert_eq!(pull.property(None, "title"), Some(&json!("Hello")));
        assert_eq!(pull.property(Some("fr"), "title"), Some(&json!("Bonjour")));
        assert_eq!(pull.languages().collect::<Vec<_>>(), vec!["fr"]);
        assert_eq!(pull.source_site.as_deref(), Some("site-a"));
    }
}
