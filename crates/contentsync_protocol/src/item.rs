//! Item identity and replication channels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cross-site identity of one content item.
///
/// `uuid` is the identity shared by every site. `local_id` is only set for
/// items whose canonical identity is a machine name (configuration-like
/// items); for those the machine name is the identifier used in keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    /// Entity type, e.g. `node` or `taxonomy_term`.
    pub entity_type: String,
    /// Bundle within the entity type, e.g. `article`.
    pub bundle: String,
    /// Cross-site UUID.
    pub uuid: String,
    /// Machine name for config-like items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
}

impl ItemRef {
    /// Creates a reference to a UUID-identified item.
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            uuid: uuid.into(),
            local_id: None,
        }
    }

    /// Sets the machine name for config-like items.
    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    /// The identifier other sites use to address this item.
    pub fn identifier(&self) -> &str {
        self.local_id.as_deref().unwrap_or(&self.uuid)
    }

    /// Key under which items waiting on this one are filed.
    ///
    /// Always `entity_type:identifier`, for files as well.
    pub fn dependency_key(&self) -> String {
        format!("{}:{}", self.entity_type, self.identifier())
    }

    /// Returns true if both refer to the same item, ignoring bundle.
    pub fn same_item(&self, other: &ItemRef) -> bool {
        self.entity_type == other.entity_type && self.identifier() == other.identifier()
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.entity_type, self.bundle, self.identifier())
    }
}

/// One replication relationship: a policy (what) over a pool (where).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel {
    /// Policy ("flow") identifier.
    pub policy_id: String,
    /// Pool identifier.
    pub pool_id: String,
}

impl Channel {
    /// Creates a new channel.
    pub fn new(policy_id: impl Into<String>, pool_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            pool_id: pool_id.into(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.policy_id, self.pool_id)
    }
}
