//! Pull intent: apply one incoming operation to the local item.

use crate::content::LocalItem;
use crate::context::RequestContext;
use crate::dependencies::MissingDependency;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::intent::{IntentBase, SyncIntent};
use crate::ledger::FailureKind;
use crate::outcome::{PullOutcome, SkipReason};
use contentsync_protocol::{
    Channel, EntityReference, ItemRef, PullOperation, PullReason, ReferenceKind, SyncAction, Value,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Applies one incoming operation over one channel.
pub struct PullIntent<'a> {
    base: IntentBase<'a>,
    reason: PullReason,
    operation: &'a PullOperation,
    parent: Option<ItemRef>,
    merge_changes: bool,
    waiting_on: Vec<(ItemRef, MissingDependency)>,
}

impl<'a> PullIntent<'a> {
    /// Creates an intent for an incoming operation.
    pub fn new(
        engine: &'a SyncEngine,
        request: &'a RequestContext,
        operation: &'a PullOperation,
        channel: Channel,
        reason: PullReason,
    ) -> SyncResult<Self> {
        let base = IntentBase::new(
            engine,
            request,
            operation.item.clone(),
            channel,
            operation.action,
        )?;
        Ok(Self {
            base,
            reason,
            operation,
            parent: None,
            merge_changes: false,
            waiting_on: Vec::new(),
        })
    }

    /// Marks the item as pulled inside `parent`.
    pub fn with_parent(mut self, parent: ItemRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Parent item for embedded pulls.
    pub fn parent(&self) -> Option<&ItemRef> {
        self.parent.as_ref()
    }

    /// The incoming operation.
    pub fn operation(&self) -> &'a PullOperation {
        self.operation
    }

    /// Reads an incoming property in the current language.
    pub fn property(&self, name: &str) -> Option<&'a Value> {
        self.operation.property(self.base.language(), name)
    }

    /// True if locally overridden fields must be kept.
    pub fn should_merge_changes(&self) -> bool {
        self.merge_changes
    }

    /// Reads a field of the bound item in the current language.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.base.field(name)
    }

    /// Writes a field of the local item in the current language, creating
    /// the item first if it does not exist yet.
    pub fn set_field(&mut self, name: &str, value: Value) -> SyncResult<()> {
        self.entity_or_create();
        self.base.set_field(name, value)
    }

    /// The local item, created from the operation if none is bound.
    pub fn entity_or_create(&mut self) -> &mut LocalItem {
        let operation = self.operation;
        let changed = operation.changed;
        let entity = self
            .base
            .entity_slot()
            .get_or_insert_with(|| LocalItem::new(operation.item.clone(), changed));
        entity.changed = entity.changed.max(changed);
        entity
    }

    /// Resolves a reference stored in an incoming property.
    ///
    /// Returns the local item if it exists. Embedded targets are pulled first.
    /// Otherwise this item is filed as waiting on the target: with `field`
    /// the field is linked directly once the target arrives, without it the
    /// whole item is pulled again. Entries are only filed if the pull is
    /// accepted.
    pub fn resolve_reference(
        &mut self,
        value: &Value,
        field: Option<&str>,
        custom_data: Option<BTreeMap<String, Value>>,
    ) -> SyncResult<Option<LocalItem>> {
        let reference = EntityReference::from_value(value)?;
        let engine = self.base.engine();
        let target = &reference.item;

        if let Some(parent) = &self.parent {
            if target.same_item(parent) {
                return engine.content().load(parent);
            }
        }

        if reference.kind == ReferenceKind::Embed {
            let operation: &'a PullOperation = self.operation;
            let embedded = operation.embedded_for(target).ok_or_else(|| {
                SyncError::data(format!(
                    "embedded item {target} missing from operation for {}",
                    self.base.item()
                ))
            })?;
            let mut child = PullIntent::new(
                engine,
                self.base.request(),
                embedded,
                self.base.channel().clone(),
                self.reason,
            )?
            .with_parent(self.base.item().clone());
            child.execute()?;
            return engine.content().load(target);
        }

        if let Some(local) = engine.content().load(target)? {
            return Ok(Some(local));
        }

        let waiting = self.base.item().clone();
        let mut entry = match field {
            Some(field) => MissingDependency::field(waiting, self.reason, field),
            None => MissingDependency::repull(waiting, self.reason),
        };
        if let Some(data) = custom_data {
            entry = entry.with_custom_data(data);
        }
        self.waiting_on.push((target.clone(), entry));
        Ok(None)
    }

    fn file_missing_dependencies(&mut self) -> SyncResult<()> {
        let engine = self.base.engine();
        for (target, entry) in std::mem::take(&mut self.waiting_on) {
            let field = entry.field.clone();
            if engine.dependencies().file(&target, entry)? {
                debug!(item = %self.base.item(), missing = %target, field = ?field, "filed missing dependency");
            }
        }
        Ok(())
    }

    /// Compares the incoming change time with the newest one applied.
    ///
    /// Older operations are always outdated. An operation with the same
    /// change time is a redelivery unless it moves the item in or out of the
    /// deleted state, or the pull re-applies a waiter.
    fn freshness(&self) -> Option<SkipReason> {
        if self.reason == PullReason::Forced {
            return None;
        }
        let status = self.base.status();
        let applied = status.pulled_change()?;
        let changed = self.operation.changed;
        if changed < applied {
            return Some(SkipReason::Outdated);
        }
        let deleting = self.operation.action == SyncAction::Delete;
        if changed == applied
            && deleting == status.is_deleted()
            && self.reason != PullReason::AsDependency
        {
            return Some(SkipReason::Unchanged);
        }
        None
    }

    fn skip(&self, reason: SkipReason) -> PullOutcome {
        debug!(
            item = %self.base.item(),
            channel = %self.base.channel(),
            action = %self.base.action(),
            reason = %reason,
            "pull skipped"
        );
        PullOutcome::Skipped(reason)
    }

    fn record_hard_failure(&mut self, error: &SyncError) {
        let engine = self.base.engine();
        let now = engine.now();
        let message = error.to_string();
        match engine.ledger().update(
            self.base.item(),
            self.base.channel(),
            self.base.entity_type_version(),
            |r| r.set_pull_failure(FailureKind::Hard, message, now),
        ) {
            Ok(record) => self.base.set_status(record),
            Err(e) => warn!(item = %self.base.item(), error = %e, "could not record pull failure"),
        }
    }

    fn run(&mut self, action: SyncAction) -> SyncResult<PullOutcome> {
        let engine = self.base.engine();
        let item = self.base.item().clone();
        let handler = engine.registry().handler(&item.entity_type, &item.bundle)?;
        if self.reason != PullReason::Forced && handler.ignore_pull(self) {
            return Ok(self.skip(SkipReason::Ignored));
        }
        if let Some(reason) = self.freshness() {
            return Ok(self.skip(reason));
        }

        self.base.request().mark_pulled(&item);
        self.merge_changes = engine.policy().merge_local_changes(self.base.channel(), &item)
            && self.base.status().overridden_locally();
        self.base.load_entity()?;

        let language = self.base.language().map(str::to_string);
        let accepted = handler.pull(self)?;
        self.base.change_translation_language(language.as_deref());
        if !accepted {
            self.waiting_on.clear();
            return Ok(self.skip(SkipReason::HandlerDenied));
        }

        if action == SyncAction::Delete {
            engine.content().delete(&item)?;
        } else {
            let entity = self.base.entity_mut().ok_or_else(|| {
                SyncError::data(format!("handler accepted {item} without a local item"))
            })?;
            engine.content().save(entity)?;
        }

        self.file_missing_dependencies()?;

        let now = engine.now();
        let changed = self.operation.changed;
        let version = self.base.entity_type_version().to_string();
        let parent = self.parent.clone();
        let record = engine
            .ledger()
            .update(&item, self.base.channel(), &version, |r| {
                r.mark_pulled(now, changed, &version, action, parent)
            })?;
        self.base.set_status(record);
        engine
            .ledger()
            .advance_pool_watermark(&self.base.channel().pool_id, self.operation.changed)?;

        info!(
            item = %item,
            channel = %self.base.channel(),
            action = %action,
            reason = %self.reason,
            "pulled"
        );

        if action != SyncAction::Delete {
            engine.resolver().resolve(&item)?;
        }
        Ok(PullOutcome::Pulled { action })
    }
}

impl<'a> SyncIntent<'a> for PullIntent<'a> {
    type Reason = PullReason;
    type Outcome = PullOutcome;

    fn base(&self) -> &IntentBase<'a> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase<'a> {
        &mut self.base
    }

    fn reason(&self) -> PullReason {
        self.reason
    }

    fn execute(&mut self) -> SyncResult<PullOutcome> {
        let action = self
            .operation
            .action
            .infer(self.base.status().has_pull_history());
        self.base.set_action(action);

        match self.run(action) {
            Ok(outcome) => Ok(outcome),
            Err(error) if error.is_internal() => Err(error),
            Err(error) => {
                let item = self.base.item().clone();
                warn!(item = %item, channel = %self.base.channel(), action = %action, error = %error, "pull failed");
                self.record_hard_failure(&error);
                Err(SyncError::Intent {
                    item: item.to_string(),
                    action,
                    reason: self.reason.to_string(),
                    source: Box::new(error),
                })
            }
        }
    }
}
