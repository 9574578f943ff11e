//! Dependency resolver: unblocks items waiting on a newly available item.

use crate::content::LocalItem;
use crate::dependencies::MissingDependency;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use contentsync_protocol::{ItemRef, PullReason};
use tracing::{debug, info, warn};

/// What one resolution pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Waiters whose field was linked directly.
    pub linked: usize,
    /// Waiters for which a pull was requested again.
    pub repulled: usize,
    /// Waiters dropped because they were deleted or no longer exist.
    pub skipped: usize,
    /// Waiters that could not be handled.
    pub failed: usize,
}

impl ResolveReport {
    /// Number of entries processed.
    pub fn total(&self) -> usize {
        self.linked + self.repulled + self.skipped + self.failed
    }
}

/// Resolves the missing-dependency entries filed under one item.
pub struct DependencyResolver<'a> {
    engine: &'a SyncEngine,
}

impl<'a> DependencyResolver<'a> {
    /// Creates a resolver on top of an engine.
    pub fn new(engine: &'a SyncEngine) -> Self {
        Self { engine }
    }

    /// Resolves everyone waiting on `item`.
    ///
    /// Does nothing while `item` is not stored locally; the entries stay
    /// filed. Each entry is claimed exactly once, and a failure on one waiter
    /// never stops the others. Failed entries are filed again for the next
    /// pass.
    pub fn resolve(&self, item: &ItemRef) -> SyncResult<ResolveReport> {
        let mut report = ResolveReport::default();
        let Some(target) = self.engine.content().load(item)? else {
            return Ok(report);
        };
        let entries = self.engine.dependencies().take(&item.dependency_key())?;
        if entries.is_empty() {
            return Ok(report);
        }
        debug!(item = %item, waiting = entries.len(), "resolving missing dependencies");

        for entry in entries {
            if self.waiter_deleted(&entry.waiting)? {
                debug!(item = %item, waiting = %entry.waiting, "waiter deleted, dropping entry");
                report.skipped += 1;
                continue;
            }
            let result = match &entry.field {
                Some(field) => self.link(&entry, field, &target).inspect_err(|e| {
                    warn!(item = %item, waiting = %entry.waiting, field = %field, error = %e, "could not link field");
                }),
                None => self.repull(&entry).inspect_err(|e| {
                    warn!(item = %item, waiting = %entry.waiting, error = %e, "could not request pull");
                }),
            };
            match result {
                Ok(true) if entry.field.is_some() => report.linked += 1,
                Ok(true) => report.repulled += 1,
                Ok(false) => report.skipped += 1,
                Err(_) => {
                    report.failed += 1;
                    self.engine.dependencies().file(item, entry)?;
                }
            }
        }

        info!(
            item = %item,
            linked = report.linked,
            repulled = report.repulled,
            skipped = report.skipped,
            failed = report.failed,
            "missing dependencies resolved"
        );
        Ok(report)
    }

    fn waiter_deleted(&self, waiting: &ItemRef) -> SyncResult<bool> {
        for channel in self
            .engine
            .policy()
            .pull_channels(waiting, PullReason::Forced)
        {
            if let Some(record) = self.engine.ledger().get(waiting, &channel)? {
                if record.is_deleted() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn link(&self, entry: &MissingDependency, field: &str, target: &LocalItem) -> SyncResult<bool> {
        let Some(mut waiting) = self.engine.content().load(&entry.waiting)? else {
            return Ok(false);
        };
        let handler = self
            .engine
            .registry()
            .handler(&entry.waiting.entity_type, &entry.waiting.bundle)?;
        handler.link_field(&mut waiting, field, target, entry.custom_data.as_ref())?;
        self.engine.content().save(&mut waiting)?;
        debug!(waiting = %entry.waiting, field = %field, target = %target.reference, "linked field");
        Ok(true)
    }

    /// Requests the waiter again on every channel it can be pulled through.
    ///
    /// Every channel is tried; fails only if none accepted the request.
    fn repull(&self, entry: &MissingDependency) -> SyncResult<bool> {
        let reason = match entry.reason {
            PullReason::Manual => PullReason::Manual,
            _ => PullReason::AsDependency,
        };
        let channels = self.engine.policy().pull_channels(&entry.waiting, reason);
        if channels.is_empty() {
            return Ok(false);
        }
        let mut first_error: Option<SyncError> = None;
        let mut requested = false;
        for channel in &channels {
            match self.engine.backend().request_pull(&entry.waiting, channel, reason) {
                Ok(()) => requested = true,
                Err(e) => {
                    warn!(waiting = %entry.waiting, channel = %channel, error = %e, "pull request failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if !requested => Err(e),
            _ => Ok(true),
        }
    }
}
