//! A configurable field-copying handler.
//!
//! Copies plain fields verbatim and turns item-reference fields into
//! dependencies, references or embeds on push. On pull it resolves them back
//! to local items, leaving unresolved ones to the missing-dependency store.

use contentsync_engine::{
    EntityHandler, LocalItem, PullIntent, PushIntent, SyncError, SyncIntent, SyncResult,
    TypeDefinition,
};
use contentsync_protocol::{ItemRef, SyncAction, Value};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// How a reference field is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
    /// Push the target first.
    Dependency,
    /// Point at the target's last push.
    Reference,
    /// Serialize the target inline.
    Embed,
}

impl ReferenceMode {
    fn as_str(&self) -> &'static str {
        match self {
            ReferenceMode::Dependency => "dependency",
            ReferenceMode::Reference => "reference",
            ReferenceMode::Embed => "embed",
        }
    }
}

/// The JSON form of an item reference as stored in local fields.
pub fn link(item: &ItemRef) -> Value {
    serde_json::to_value(item).expect("item reference serializes")
}

/// Generic handler for tests.
#[derive(Debug, Default)]
pub struct FieldHandler {
    fields: Vec<String>,
    references: BTreeMap<String, ReferenceMode>,
    forbidden: Vec<String>,
    skip_unpublished: bool,
    repull_missing: bool,
    uri_links: bool,
    denying: AtomicBool,
    ignoring: AtomicBool,
    failing: AtomicBool,
    push_calls: AtomicUsize,
    pull_calls: AtomicUsize,
}

impl FieldHandler {
    /// Creates a handler with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds plain fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds a reference field.
    pub fn with_reference(mut self, field: impl Into<String>, mode: ReferenceMode) -> Self {
        self.references.insert(field.into(), mode);
        self
    }

    /// Adds a forbidden field.
    pub fn with_forbidden(mut self, field: impl Into<String>) -> Self {
        self.forbidden.push(field.into());
        self
    }

    /// Declines items whose `status` field is `false`.
    pub fn skip_unpublished(mut self) -> Self {
        self.skip_unpublished = true;
        self
    }

    /// Files unresolved references for a full re-pull instead of a field link.
    pub fn repull_missing(mut self) -> Self {
        self.repull_missing = true;
        self
    }

    /// Stores resolved references as `entity:<type>/<id>` link strings.
    pub fn uri_links(mut self) -> Self {
        self.uri_links = true;
        self
    }

    /// Makes push and pull return false.
    pub fn set_denying(&self, denying: bool) {
        self.denying.store(denying, Ordering::SeqCst);
    }

    /// Makes `ignore_push` and `ignore_pull` return true.
    pub fn set_ignoring(&self, ignoring: bool) {
        self.ignoring.store(ignoring, Ordering::SeqCst);
    }

    /// Makes push, pull and field linking fail with a data error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `push` calls.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Number of `pull` calls.
    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    fn link_value(&self, target: &LocalItem) -> Value {
        if self.uri_links {
            json!(format!(
                "entity:{}/{}",
                target.reference.entity_type,
                target.id.unwrap_or_default()
            ))
        } else {
            link(&target.reference)
        }
    }

    fn is_unpublished(value: Option<&Value>) -> bool {
        value == Some(&Value::Bool(false))
    }

    fn push_reference(
        intent: &mut PushIntent<'_>,
        value: &Value,
        mode: ReferenceMode,
    ) -> SyncResult<Value> {
        let target: ItemRef = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::data(format!("not an item reference: {e}")))?;
        let reference = match mode {
            ReferenceMode::Dependency => intent.add_dependency(&target)?,
            ReferenceMode::Reference => intent.add_reference(&target)?,
            ReferenceMode::Embed => intent.embed(&target)?,
        };
        Ok(reference.to_value())
    }

    fn pull_reference(
        &self,
        intent: &mut PullIntent<'_>,
        field: &str,
        value: &Value,
    ) -> SyncResult<Option<Value>> {
        let waiting_field = if self.repull_missing { None } else { Some(field) };
        Ok(intent
            .resolve_reference(value, waiting_field, None)?
            .map(|local| self.link_value(&local)))
    }
}

impl EntityHandler for FieldHandler {
    fn push(&self, intent: &mut PushIntent<'_>) -> SyncResult<bool> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::data("field serialization failed"));
        }
        if self.denying.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let entity = intent
            .entity()
            .cloned()
            .ok_or_else(|| SyncError::data("no local item"))?;
        if self.skip_unpublished && Self::is_unpublished(entity.field(None, "status")) {
            return Ok(false);
        }

        for name in &self.fields {
            if let Some(value) = entity.field(None, name) {
                intent.set_property(name.clone(), value.clone());
            }
        }
        for language in entity.languages() {
            intent.change_translation_language(Some(language));
            for name in &self.fields {
                if let Some(value) = entity.field(Some(language), name) {
                    intent.set_property(name.clone(), value.clone());
                }
            }
        }
        intent.change_translation_language(None);

        for (name, mode) in &self.references {
            let Some(value) = entity.field(None, name) else {
                continue;
            };
            let sent = match value {
                Value::Array(values) => Value::Array(
                    values
                        .iter()
                        .map(|v| Self::push_reference(intent, v, *mode))
                        .collect::<SyncResult<Vec<_>>>()?,
                ),
                Value::Null => Value::Null,
                other => Self::push_reference(intent, other, *mode)?,
            };
            intent.set_property(name.clone(), sent);
        }
        Ok(true)
    }

    fn pull(&self, intent: &mut PullIntent<'_>) -> SyncResult<bool> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::data("field import failed"));
        }
        if self.denying.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let operation = intent.operation();
        if intent.action() == SyncAction::Delete {
            return Ok(true);
        }

        let merge = intent.should_merge_changes();
        intent.entity_or_create();
        let languages: Vec<Option<&str>> = std::iter::once(None)
            .chain(operation.languages().map(Some))
            .collect();
        for language in languages {
            intent.change_translation_language(language);
            for name in &self.fields {
                let Some(value) = operation.property(language, name) else {
                    continue;
                };
                if merge && intent.field(name).is_some() {
                    continue;
                }
                intent.set_field(name, value.clone())?;
            }
        }
        intent.change_translation_language(None);

        for name in self.references.keys() {
            let Some(value) = operation.property(None, name) else {
                continue;
            };
            let linked = match value {
                Value::Array(values) => {
                    let mut resolved = Vec::new();
                    for v in values {
                        if let Some(local) = self.pull_reference(intent, name, v)? {
                            resolved.push(local);
                        }
                    }
                    Value::Array(resolved)
                }
                Value::Null => Value::Null,
                other => self.pull_reference(intent, name, other)?.unwrap_or(Value::Null),
            };
            intent.set_field(name, linked)?;
        }
        Ok(!(self.skip_unpublished && Self::is_unpublished(operation.property(None, "status"))))
    }

    fn ignore_push(&self, _intent: &PushIntent<'_>) -> bool {
        self.ignoring.load(Ordering::SeqCst)
    }

    fn ignore_pull(&self, _intent: &PullIntent<'_>) -> bool {
        self.ignoring.load(Ordering::SeqCst)
    }

    fn forbidden_fields(&self) -> Vec<String> {
        self.forbidden.clone()
    }

    fn update_type_definition(&self, definition: &mut TypeDefinition) {
        for name in &self.fields {
            definition.add_field(name.clone(), json!({"type": "value"}));
        }
        for (name, mode) in &self.references {
            definition.add_field(
                name.clone(),
                json!({"type": "reference", "mode": mode.as_str()}),
            );
        }
    }

    fn link_field(
        &self,
        waiting: &mut LocalItem,
        field: &str,
        target: &LocalItem,
        _custom_data: Option<&BTreeMap<String, Value>>,
    ) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::data(format!("cannot link {field}")));
        }
        let value = self.link_value(target);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_definition_lists_fields() {
        let handler = FieldHandler::new()
            .with_fields(["title"])
            .with_reference("tags", ReferenceMode::Dependency);
        let mut definition = TypeDefinition::new("node", "article");
        handler.update_type_definition(&mut definition);

        assert_eq!(definition.fields["title"], json!({"type": "value"}));
        assert_eq!(definition.fields["tags"]["mode"], json!("dependency"));
    }

    #[test]
    fn uri_links_use_local_id() {
        let handler = FieldHandler::new().uri_links();
        let mut target = LocalItem::new(ItemRef::new("node", "page", "p1"), 1);
        target.id = Some(7);
        let mut waiting = LocalItem::new(ItemRef::new("menu_link", "menu_link", "m1"), 1);

        handler.link_field(&mut waiting, "link", &target, None).unwrap();
        assert_eq!(waiting.field(None, "link"), Some(&json!("entity:node/7")));
    }
}
