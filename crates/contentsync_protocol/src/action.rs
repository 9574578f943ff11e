//! Actions and reasons.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What an operation does to the item on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncAction {
    /// Item does not exist on the receiving side yet.
    Create,
    /// Item exists and is replaced.
    Update,
    /// Item is removed.
    Delete,
}

impl SyncAction {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    /// Flips create/update based on whether the channel has history.
    ///
    /// Delete is never changed.
    pub fn infer(self, has_history: bool) -> Self {
        match (self, has_history) {
            (SyncAction::Create, true) => SyncAction::Update,
            (SyncAction::Update, false) => SyncAction::Create,
            (action, _) => action,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(ProtocolError::UnknownCode {
                kind: "action",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a push was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushReason {
    /// Triggered by a local save/delete.
    Automatic,
    /// Triggered by an editor.
    Manual,
    /// Pushed because another item depends on it.
    AsDependency,
    /// Pushed even if unchanged.
    Forced,
}

impl PushReason {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PushReason::Automatic => "automatic",
            PushReason::Manual => "manual",
            PushReason::AsDependency => "as-dependency",
            PushReason::Forced => "forced",
        }
    }
}

impl fmt::Display for PushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushReason {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(PushReason::Automatic),
            "manual" => Ok(PushReason::Manual),
            "as-dependency" => Ok(PushReason::AsDependency),
            "forced" => Ok(PushReason::Forced),
            other => Err(ProtocolError::UnknownCode {
                kind: "push reason",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a pull was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullReason {
    /// Delivered by the backend on its own.
    Automatic,
    /// Requested by an editor.
    Manual,
    /// Requested because another item references it.
    AsDependency,
    /// Applied even if the policy would normally ignore it.
    Forced,
}

impl PullReason {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PullReason::Automatic => "automatic",
            PullReason::Manual => "manual",
            PullReason::AsDependency => "as-dependency",
            PullReason::Forced => "forced",
        }
    }
}

impl fmt::Display for PullReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullReason {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(PullReason::Automatic),
            "manual" => Ok(PullReason::Manual),
            "as-dependency" => Ok(PullReason::AsDependency),
            "forced" => Ok(PullReason::Forced),
            other => Err(ProtocolError::UnknownCode {
                kind: "pull reason",
                value: other.to_string(),
            }),
        }
    }
}
