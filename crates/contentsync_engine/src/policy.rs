//! Channel selection: which policies and pools apply to an item.

use crate::error::{SyncError, SyncResult};
use crate::handler::ANY_BUNDLE;
use contentsync_protocol::{Channel, ItemRef, PullReason, PushReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a policy uses a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolUsage {
    /// Always replicated through this pool.
    Force,
    /// Replicated on request (manual or as a dependency).
    Allow,
    /// Never replicated through this pool.
    Forbid,
}

/// When a policy pushes matching items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushMode {
    /// Never.
    #[default]
    Disabled,
    /// On every local change.
    Automatic,
    /// When an editor asks.
    Manual,
    /// Only when another item depends on it.
    AsDependency,
}

/// When a policy pulls matching items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullMode {
    /// Never.
    #[default]
    Disabled,
    /// Whenever the backend delivers them.
    Automatic,
    /// When an editor asks.
    Manual,
    /// Only when another pulled item depends on it.
    AsDependency,
}

impl PushMode {
    fn allows(self, reason: PushReason) -> bool {
        match (self, reason) {
            (PushMode::Disabled, _) => false,
            (PushMode::Automatic, _) => true,
            (PushMode::Manual, PushReason::Automatic) => false,
            (PushMode::Manual, _) => true,
            (PushMode::AsDependency, reason) => {
                matches!(reason, PushReason::AsDependency | PushReason::Forced)
            }
        }
    }
}

impl PullMode {
    fn allows(self, reason: PullReason) -> bool {
        match (self, reason) {
            (PullMode::Disabled, _) => false,
            (PullMode::Automatic, _) => true,
            (PullMode::Manual, PullReason::Automatic) => false,
            (PullMode::Manual, _) => true,
            (PullMode::AsDependency, reason) => {
                matches!(reason, PullReason::AsDependency | PullReason::Forced)
            }
        }
    }
}

/// Decides which channels apply to an item.
pub trait PolicyResolver: Send + Sync {
    /// Channels to push `item` through, preferred first.
    fn push_channels(&self, item: &ItemRef, reason: PushReason) -> Vec<Channel>;

    /// Channels `item` may be pulled through, preferred first.
    fn pull_channels(&self, item: &ItemRef, reason: PullReason) -> Vec<Channel>;

    /// How the channel's policy uses its pool for `item`.
    fn pool_usage(&self, channel: &Channel, item: &ItemRef) -> PoolUsage;

    /// Whether local overrides must be merged instead of overwritten.
    fn merge_local_changes(&self, channel: &Channel, item: &ItemRef) -> bool;
}

/// One policy's settings for one entity type and bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Policy identifier.
    pub policy_id: String,
    /// Entity type the rule covers.
    pub entity_type: String,
    /// Bundle, or `*` for all bundles.
    #[serde(default = "any_bundle")]
    pub bundle: String,
    /// Push direction.
    #[serde(default)]
    pub push: PushMode,
    /// Pull direction.
    #[serde(default)]
    pub pull: PullMode,
    /// Pool id to usage.
    #[serde(default)]
    pub pools: BTreeMap<String, PoolUsage>,
    /// Merge incoming data into locally overridden items.
    #[serde(default)]
    pub respect_local_overrides: bool,
}

fn any_bundle() -> String {
    ANY_BUNDLE.to_string()
}

impl PolicyRule {
    /// A rule with no directions and no pools.
    pub fn new(policy_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            entity_type: entity_type.into(),
            bundle: any_bundle(),
            push: PushMode::Disabled,
            pull: PullMode::Disabled,
            pools: BTreeMap::new(),
            respect_local_overrides: false,
        }
    }

    /// Restricts the rule to one bundle.
    pub fn bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = bundle.into();
        self
    }

    /// Sets the push direction.
    pub fn push(mut self, mode: PushMode) -> Self {
        self.push = mode;
        self
    }

    /// Sets the pull direction.
    pub fn pull(mut self, mode: PullMode) -> Self {
        self.pull = mode;
        self
    }

    /// Sets a pool's usage.
    pub fn pool(mut self, pool_id: impl Into<String>, usage: PoolUsage) -> Self {
        self.pools.insert(pool_id.into(), usage);
        self
    }

    /// Enables merging into locally overridden items.
    pub fn respect_local_overrides(mut self) -> Self {
        self.respect_local_overrides = true;
        self
    }

    fn matches(&self, item: &ItemRef) -> bool {
        self.entity_type == item.entity_type
            && (self.bundle == ANY_BUNDLE || self.bundle == item.bundle)
    }

    fn pools_with(&self, usage: PoolUsage) -> impl Iterator<Item = &str> {
        self.pools
            .iter()
            .filter(move |(_, u)| **u == usage)
            .map(|(pool, _)| pool.as_str())
    }

    fn channels(&self, usages: &[PoolUsage]) -> Vec<Channel> {
        usages
            .iter()
            .flat_map(|usage| self.pools_with(*usage))
            .map(|pool| Channel::new(self.policy_id.clone(), pool))
            .collect()
    }
}

/// A policy resolver over a fixed list of rules.
///
/// Rules are consulted in order; a bundle-specific rule of a policy shadows
/// that policy's wildcard rule.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    rules: Vec<PolicyRule>,
}

impl StaticPolicy {
    /// Builds a resolver from rules.
    pub fn from_rules(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// Parses a JSON array of rules.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let rules: Vec<PolicyRule> = serde_json::from_str(json)
            .map_err(|e| SyncError::data(format!("invalid policy rules: {e}")))?;
        Ok(Self::from_rules(rules))
    }

    /// The configured rules.
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Effective rule per policy for an item.
    fn applicable<'a>(&'a self, item: &'a ItemRef) -> impl Iterator<Item = &'a PolicyRule> {
        self.rules.iter().filter(move |rule| {
            rule.matches(item)
                && (rule.bundle != ANY_BUNDLE
                    || !self.rules.iter().any(|other| {
                        other.policy_id == rule.policy_id
                            && other.entity_type == item.entity_type
                            && other.bundle == item.bundle
                    }))
        })
    }

    fn rule_for<'s>(&'s self, policy_id: &str, item: &'s ItemRef) -> Option<&'s PolicyRule> {
        self.applicable(item).find(|rule| rule.policy_id == policy_id)
    }
}

impl PolicyResolver for StaticPolicy {
    fn push_channels(&self, item: &ItemRef, reason: PushReason) -> Vec<Channel> {
        let usages: &[PoolUsage] = match reason {
            PushReason::Automatic => &[PoolUsage::Force],
            _ => &[PoolUsage::Force, PoolUsage::Allow],
        };
        self.applicable(item)
            .filter(|rule| rule.push.allows(reason))
            .flat_map(|rule| rule.channels(usages))
            .collect()
    }

    fn pull_channels(&self, item: &ItemRef, reason: PullReason) -> Vec<Channel> {
        self.applicable(item)
            .filter(|rule| rule.pull.allows(reason))
            .flat_map(|rule| rule.channels(&[PoolUsage::Force, PoolUsage::Allow]))
            .collect()
    }

    fn pool_usage(&self, channel: &Channel, item: &ItemRef) -> PoolUsage {
        self.rule_for(&channel.policy_id, item)
            .and_then(|rule| rule.pools.get(&channel.pool_id).copied())
            .unwrap_or(PoolUsage::Forbid)
    }

    fn merge_local_changes(&self, channel: &Channel, item: &ItemRef) -> bool {
        self.rule_for(&channel.policy_id, item)
            .is_some_and(|rule| rule.respect_local_overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> ItemRef {
        ItemRef::new("node", "article", "n1")
    }

    fn policy() -> StaticPolicy {
        StaticPolicy::from_rules(vec![
            PolicyRule::new("content", "node")
                .push(PushMode::Automatic)
                .pull(PullMode::Automatic)
                .pool("main", PoolUsage::Force)
                .pool("archive", PoolUsage::Allow)
                .pool("private", PoolUsage::Forbid),
            PolicyRule::new("content", "node")
                .bundle("page")
                .push(PushMode::Manual)
                .pool("main", PoolUsage::Allow),
        ])
    }

    #[test]
    fn automatic_push_uses_forced_pools_only() {
        let channels = policy().push_channels(&article(), PushReason::Automatic);
        assert_eq!(channels, vec![Channel::new("content", "main")]);
    }

    #[test]
    fn dependency_push_adds_allowed_pools_after_forced() {
        let channels = policy().push_channels(&article(), PushReason::AsDependency);
        assert_eq!(
            channels,
            vec![
                Channel::new("content", "main"),
                Channel::new("content", "archive"),
            ]
        );
    }

    #[test]
    fn bundle_rule_shadows_wildcard() {
        let page = ItemRef::new("node", "page", "p1");
        let policy = policy();
        assert!(policy.push_channels(&page, PushReason::Automatic).is_empty());
        assert_eq!(
            policy.push_channels(&page, PushReason::Manual),
            vec![Channel::new("content", "main")]
        );
        assert_eq!(
            policy.pool_usage(&Channel::new("content", "archive"), &page),
            PoolUsage::Forbid
        );
    }

    #[test]
    fn unknown_types_have_no_channels() {
        let term = ItemRef::new("taxonomy_term", "tags", "t1");
        assert!(policy().push_channels(&term, PushReason::Forced).is_empty());
        assert!(policy().pull_channels(&term, PullReason::Manual).is_empty());
    }

    #[test]
    fn rules_parse_from_json() {
        let policy = StaticPolicy::from_json(
            r#"[{
                "policy_id": "tags",
                "entity_type": "taxonomy_term",
                "push": "as-dependency",
                "pull": "automatic",
                "pools": {"main": "force"},
                "respect_local_overrides": true
            }]"#,
        )
        .unwrap();
        let term = ItemRef::new("taxonomy_term", "tags", "t1");
        let main = Channel::new("tags", "main");

        assert!(policy.push_channels(&term, PushReason::Automatic).is_empty());
        assert_eq!(policy.push_channels(&term, PushReason::AsDependency), vec![main.clone()]);
        assert_eq!(policy.rules()[0].bundle, "*");
        assert!(policy.merge_local_changes(&main, &term));
        assert_eq!(policy.pool_usage(&main, &term), PoolUsage::Force);
    }

    #[test]
    fn invalid_json_is_a_data_error() {
        assert!(matches!(
            StaticPolicy::from_json("{\"nope\": 1}"),
            Err(SyncError::Data(_))
        ));
    }
}
