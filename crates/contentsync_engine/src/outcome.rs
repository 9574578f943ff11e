//! Intent outcomes and batch reports.

use contentsync_protocol::SyncAction;
use std::collections::BTreeMap;
use std::fmt;

/// Why an intent did not send or apply anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// The item was pulled earlier in the same request.
    JustPulled,
    /// Delete requested for an item the backend never received.
    NeverPushed,
    /// Content hash matches the last successful push.
    Unchanged,
    /// The type handler returned false.
    HandlerDenied,
    /// The type handler asked to ignore this item.
    Ignored,
    /// No policy applies to the item.
    NoChannel,
    /// The same item and channel is already being pushed higher up.
    InProgress,
    /// Dependency nesting went past the configured limit.
    DepthExceeded,
    /// Incoming operation is older than the one already applied.
    Outdated,
}

impl SkipReason {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::JustPulled => "just-pulled",
            SkipReason::NeverPushed => "never-pushed",
            SkipReason::Unchanged => "unchanged",
            SkipReason::HandlerDenied => "handler-denied",
            SkipReason::Ignored => "ignored",
            SkipReason::NoChannel => "no-channel",
            SkipReason::InProgress => "in-progress",
            SkipReason::DepthExceeded => "depth-exceeded",
            SkipReason::Outdated => "outdated",
        }
    }

    /// Verdicts written to the status record as soft failures.
    pub fn is_soft_failure(&self) -> bool {
        matches!(self, SkipReason::Unchanged | SkipReason::HandlerDenied)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a push intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The operation reached the backend.
    Pushed {
        /// Action after inference.
        action: SyncAction,
        /// Content hash now stored on the status record.
        hash: String,
    },
    /// Nothing was sent.
    Skipped(SkipReason),
}

impl PushOutcome {
    /// Returns true if the backend received the operation.
    pub fn is_pushed(&self) -> bool {
        matches!(self, PushOutcome::Pushed { .. })
    }

    /// The skip reason, if nothing was sent.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            PushOutcome::Skipped(reason) => Some(*reason),
            PushOutcome::Pushed { .. } => None,
        }
    }
}

/// Result of a pull intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The operation was applied locally.
    Pulled {
        /// Action after inference.
        action: SyncAction,
    },
    /// Nothing was applied.
    Skipped(SkipReason),
}

impl PullOutcome {
    /// Returns true if the item was applied.
    pub fn is_pulled(&self) -> bool {
        matches!(self, PullOutcome::Pulled { .. })
    }

    /// The skip reason, if nothing was applied.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            PullOutcome::Skipped(reason) => Some(*reason),
            PullOutcome::Pulled { .. } => None,
        }
    }
}

/// Aggregated per-item outcomes of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations sent to the backend.
    pub pushed: u64,
    /// Operations applied locally.
    pub pulled: u64,
    /// Skipped entries by reason.
    pub skipped: BTreeMap<SkipReason, u64>,
    /// Failed entries as (item, message).
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    /// Counts a push outcome.
    pub fn record_push(&mut self, outcome: &PushOutcome) {
        match outcome {
            PushOutcome::Pushed { .. } => self.pushed += 1,
            PushOutcome::Skipped(reason) => self.record_skip(*reason),
        }
    }

    /// Counts a pull outcome.
    pub fn record_pull(&mut self, outcome: &PullOutcome) {
        match outcome {
            PullOutcome::Pulled { .. } => self.pulled += 1,
            PullOutcome::Skipped(reason) => self.record_skip(*reason),
        }
    }

    /// Counts a skip.
    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    /// Records a failure.
    pub fn record_failure(&mut self, item: impl Into<String>, message: impl Into<String>) {
        self.failed.push((item.into(), message.into()));
    }

    /// Number of skips for `reason`.
    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    /// Total number of entries seen.
    pub fn total(&self) -> u64 {
        self.pushed + self.pulled + self.skipped.values().sum::<u64>() + self.failed.len() as u64
    }

    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reason_strings() {
        assert_eq!(SkipReason::JustPulled.as_str(), "just-pulled");
        assert_eq!(SkipReason::NeverPushed.to_string(), "never-pushed");
        assert!(SkipReason::Unchanged.is_soft_failure());
        assert!(SkipReason::HandlerDenied.is_soft_failure());
        assert!(!SkipReason::JustPulled.is_soft_failure());
        assert_eq!(SkipReason::Outdated.as_str(), "outdated");
    }

    #[test]
    fn report_counts() {
        let mut report = SyncReport::default();
        report.record_push(&PushOutcome::Pushed {
            action: SyncAction::Create,
            hash: "h".into(),
        });
        report.record_push(&PushOutcome::Skipped(SkipReason::Unchanged));
        report.record_push(&PushOutcome::Skipped(SkipReason::Unchanged));
        report.record_pull(&PullOutcome::Pulled {
            action: SyncAction::Update,
        });
        report.record_failure("node.article:n1", "backend error: 503");

        assert_eq!(report.pushed, 1);
        assert_eq!(report.pulled, 1);
        assert_eq!(report.skipped_for(SkipReason::Unchanged), 2);
        assert_eq!(report.total(), 5);
        assert!(!report.is_clean());
    }
}
