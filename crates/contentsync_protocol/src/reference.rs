//! Links between items inside an operation.

use crate::error::{ProtocolError, ProtocolResult};
use crate::item::ItemRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Strength of a cross-item link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// Best-effort pointer; carries a hash only if the target was pushed before.
    Reference,
    /// Target was pushed before the referring operation.
    Dependency,
    /// Target is nested inside the referring operation.
    Embed,
}

/// A link from one operation to another item.
///
/// Handlers store the JSON form of this ([`EntityReference::to_value`]) in a
/// property; the receiving side reads it back with
/// [`EntityReference::from_value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReference {
    /// Link strength.
    pub kind: ReferenceKind,
    /// Target item.
    pub item: ItemRef,
    /// Pool the target was (or will be) pushed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    /// Content hash of the target as last pushed, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl EntityReference {
    /// A pointer the backend may or may not be able to resolve.
    pub fn bare(item: ItemRef) -> Self {
        Self {
            kind: ReferenceKind::Reference,
            item,
            pool_id: None,
            hash: None,
        }
    }

    /// Returns true if the receiving side can resolve it without waiting.
    pub fn is_resolved(&self) -> bool {
        self.hash.is_some() || self.kind == ReferenceKind::Embed
    }

    /// JSON form stored in operation properties.
    pub fn to_value(&self) -> Value {
        // Struct of strings and enums, serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Reads a reference back from its JSON form.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| ProtocolError::invalid_structure(format!("not a reference: {e}")))
    }

    /// Cheap structural check used when walking arbitrary properties.
    pub fn looks_like_reference(value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|map| map.contains_key("kind") && map.contains_key("item"))
    }
}
