//! Push intent: decide whether and what to send for one item and channel.

use crate::content::LocalItem;
use crate::context::RequestContext;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::handler::EntityHandler;
use crate::intent::{IntentBase, SyncIntent};
use crate::ledger::FailureKind;
use crate::outcome::{PushOutcome, SkipReason};
use crate::policy::PoolUsage;
use contentsync_protocol::{
    Channel, EntityReference, ItemRef, PushOperation, PushReason, ReferenceKind, SyncAction, Value,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An embedded child whose status is written once the parent is sent.
#[derive(Debug, Clone)]
struct EmbeddedPush {
    item: ItemRef,
    parent: ItemRef,
    hash: String,
    version: String,
    action: SyncAction,
}

/// Sends one item over one channel.
///
/// Handlers fill the operation through [`set_property`](Self::set_property)
/// and link other items with [`add_dependency`](Self::add_dependency),
/// [`add_reference`](Self::add_reference) and [`embed`](Self::embed).
pub struct PushIntent<'a> {
    base: IntentBase<'a>,
    reason: PushReason,
    depth: usize,
    quick_edit: bool,
    operation: PushOperation,
    embedded: Vec<EmbeddedPush>,
}

impl<'a> PushIntent<'a> {
    /// Creates an intent; the local item is not bound yet.
    pub fn new(
        engine: &'a SyncEngine,
        request: &'a RequestContext,
        item: ItemRef,
        channel: Channel,
        action: SyncAction,
        reason: PushReason,
    ) -> SyncResult<Self> {
        let base = IntentBase::new(engine, request, item, channel, action)?;
        let operation = PushOperation::new(
            base.item().clone(),
            base.channel().clone(),
            action,
            base.entity_type_version(),
            engine.config().site_id.clone(),
        );
        Ok(Self {
            base,
            reason,
            depth: 0,
            quick_edit: false,
            operation,
            embedded: Vec::new(),
        })
    }

    /// Marks the push as triggered by an in-place quick edit.
    ///
    /// The effective change time is then at least "now".
    pub fn with_quick_edit(mut self) -> Self {
        self.quick_edit = true;
        self
    }

    /// Dependency nesting level; 0 for a top-level push.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The operation being built.
    pub fn operation(&self) -> &PushOperation {
        &self.operation
    }

    /// The operation being built, mutably.
    pub fn operation_mut(&mut self) -> &mut PushOperation {
        &mut self.operation
    }

    /// Binds the local item to serialize.
    pub fn set_entity(&mut self, entity: LocalItem) -> SyncResult<()> {
        self.base.set_entity(entity)
    }

    /// Reads a field of the bound item in the current language.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.base.field(name)
    }

    /// Sets an operation property in the current language.
    pub fn set_property(&mut self, name: impl Into<String>, value: Value) {
        let language = self.base.language().map(str::to_string);
        self.operation.set_property(language.as_deref(), name, value);
    }

    /// Reads an operation property in the current language.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.operation.property(self.base.language(), name)
    }

    pub(crate) fn load_entity(&mut self) -> SyncResult<bool> {
        self.base.load_entity()
    }

    fn engine(&self) -> &'a SyncEngine {
        self.base.engine()
    }

    /// Pushes `target` before this item so the backend can resolve it.
    ///
    /// Falls back to [`add_reference`](Self::add_reference) when no channel
    /// applies, the target is already being pushed higher up, or the depth
    /// limit is reached.
    pub fn add_dependency(&mut self, target: &ItemRef) -> SyncResult<EntityReference> {
        let engine = self.engine();
        let request = self.base.request();

        let Some(channel) = self.dependency_channel(target) else {
            debug!(item = %self.base.item(), dependency = %target, reason = %SkipReason::NoChannel, "dependency sent as reference");
            return self.add_reference(target);
        };
        if self.depth >= engine.config().max_dependency_depth {
            debug!(item = %self.base.item(), dependency = %target, reason = %SkipReason::DepthExceeded, "dependency sent as reference");
            return self.add_reference(target);
        }
        if request.is_in_progress(target, &channel) {
            debug!(item = %self.base.item(), dependency = %target, reason = %SkipReason::InProgress, "dependency sent as bare reference");
            return Ok(self.add_cycle_reference(target));
        }

        let mut child = PushIntent::new(
            engine,
            request,
            target.clone(),
            channel.clone(),
            SyncAction::Create,
            PushReason::AsDependency,
        )?;
        child.depth = self.depth + 1;
        if !child.load_entity()? {
            return Err(SyncError::data(format!(
                "dependency {target} of {} does not exist locally",
                self.base.item()
            )));
        }
        let outcome = child.execute()?;

        let reference = match engine.ledger().get(target, &channel)? {
            Some(record) if record.has_push_history() => EntityReference {
                kind: ReferenceKind::Dependency,
                item: target.clone(),
                pool_id: Some(channel.pool_id.clone()),
                hash: record.push_hash().map(str::to_string),
            },
            _ => {
                debug!(item = %self.base.item(), dependency = %target, ?outcome, "dependency has no push history");
                EntityReference::bare(target.clone())
            }
        };
        self.operation.add_reference(reference.clone());
        Ok(reference)
    }

    /// Links `target` with the hash of its last push on any applicable
    /// channel, or as a bare pointer if it was never pushed.
    pub fn add_reference(&mut self, target: &ItemRef) -> SyncResult<EntityReference> {
        let engine = self.engine();
        let mut channels = engine
            .policy()
            .push_channels(target, PushReason::AsDependency);
        channels.sort_by_key(|channel| channel != self.base.channel());

        let mut reference = EntityReference::bare(target.clone());
        for channel in channels {
            let Some(record) = engine.ledger().get(target, &channel)? else {
                continue;
            };
            if !record.has_push_history() {
                continue;
            }
            if let Some(hash) = record.push_hash() {
                reference.pool_id = Some(channel.pool_id.clone());
                reference.hash = Some(hash.to_string());
                break;
            }
        }
        self.operation.add_reference(reference.clone());
        Ok(reference)
    }

    /// Links an item that is still being pushed higher up in this request.
    ///
    /// The target's stored hash is about to change, so it is left out;
    /// otherwise two items referring to each other never hash the same twice.
    fn add_cycle_reference(&mut self, target: &ItemRef) -> EntityReference {
        let reference = EntityReference::bare(target.clone());
        self.operation.add_reference(reference.clone());
        reference
    }

    /// Serializes `target` inline into this operation.
    pub fn embed(&mut self, target: &ItemRef) -> SyncResult<EntityReference> {
        let request = self.base.request();
        let channel = self.base.channel().clone();
        if !request.enter(target, &channel) {
            debug!(item = %self.base.item(), embedded = %target, "embed cycle, sending a bare reference");
            return Ok(self.add_cycle_reference(target));
        }
        let result = self.embed_entered(target, &channel);
        request.leave(target, &channel);
        result
    }

    fn embed_entered(&mut self, target: &ItemRef, channel: &Channel) -> SyncResult<EntityReference> {
        let engine = self.engine();
        let mut child = PushIntent::new(
            engine,
            self.base.request(),
            target.clone(),
            channel.clone(),
            SyncAction::Create,
            self.reason,
        )?;
        child.depth = self.depth;
        if !child.load_entity()? {
            return Err(SyncError::data(format!(
                "embedded item {target} of {} does not exist locally",
                self.base.item()
            )));
        }
        let action = SyncAction::Create.infer(child.base.status().has_push_history());
        child.base.set_action(action);

        let handler = engine.registry().handler(&target.entity_type, &target.bundle)?;
        if handler.ignore_push(&child) {
            return self.add_reference(target);
        }
        let version = child.base.entity_type_version().to_string();
        if !child.serialize(&handler, action, version.clone())? {
            return self.add_reference(target);
        }
        let hash = child.operation.hash()?;

        self.embedded.push(EmbeddedPush {
            item: target.clone(),
            parent: self.base.item().clone(),
            hash: hash.clone(),
            version,
            action,
        });
        self.embedded.append(&mut child.embedded);
        self.operation.embedded.push(child.operation);

        let reference = EntityReference {
            kind: ReferenceKind::Embed,
            item: target.clone(),
            pool_id: Some(channel.pool_id.clone()),
            hash: Some(hash),
        };
        self.operation.add_reference(reference.clone());
        Ok(reference)
    }

    fn dependency_channel(&self, target: &ItemRef) -> Option<Channel> {
        let policy = self.engine().policy();
        let channels = policy.push_channels(target, PushReason::AsDependency);
        let own = self.base.channel();
        channels
            .iter()
            .find(|c| *c == own)
            .or_else(|| channels.iter().find(|c| c.pool_id == own.pool_id))
            .or_else(|| {
                channels
                    .iter()
                    .find(|c| policy.pool_usage(c, target) != PoolUsage::Forbid)
            })
            .cloned()
    }

    /// Item change time, raised by the type's resolver and quick edits.
    fn effective_change_time(&self) -> SyncResult<i64> {
        let engine = self.engine();
        let now = engine.now();
        let Some(entity) = self.base.entity() else {
            return Ok(now);
        };
        let resolver = engine.registry().change_time(&self.base.item().entity_type);
        let mut changed = resolver
            .change_time(entity, engine.content())?
            .max(entity.changed);
        if self.quick_edit {
            changed = changed.max(now);
        }
        Ok(changed)
    }

    /// Builds a fresh operation and lets the handler fill it.
    ///
    /// Deletes carry no properties and skip the handler.
    fn serialize(
        &mut self,
        handler: &Arc<dyn EntityHandler>,
        action: SyncAction,
        version: String,
    ) -> SyncResult<bool> {
        let mut operation = PushOperation::new(
            self.base.item().clone(),
            self.base.channel().clone(),
            action,
            version,
            self.engine().config().site_id.clone(),
        );
        operation.changed = self.effective_change_time()?;
        self.operation = operation;
        self.embedded.clear();
        if action == SyncAction::Delete {
            return Ok(true);
        }
        if self.base.entity().is_none() {
            return Err(SyncError::data(format!(
                "no local item bound for {}",
                self.base.item()
            )));
        }
        let language = self.base.language().map(str::to_string);
        let accepted = handler.push(self)?;
        self.base.change_translation_language(language.as_deref());
        Ok(accepted)
    }

    fn record_soft_failure(&mut self, reason: SkipReason) -> SyncResult<()> {
        let engine = self.engine();
        if !engine.config().record_soft_failures {
            return Ok(());
        }
        let now = engine.now();
        let record = engine.ledger().update(
            self.base.item(),
            self.base.channel(),
            self.base.entity_type_version(),
            |r| r.set_push_failure(FailureKind::Soft, reason.as_str(), now),
        )?;
        self.base.set_status(record);
        Ok(())
    }

    fn record_hard_failure(&mut self, error: &SyncError) {
        let engine = self.engine();
        let now = engine.now();
        let message = error.to_string();
        match engine.ledger().update(
            self.base.item(),
            self.base.channel(),
            self.base.entity_type_version(),
            |r| r.set_push_failure(FailureKind::Hard, message, now),
        ) {
            Ok(record) => self.base.set_status(record),
            Err(e) => warn!(item = %self.base.item(), error = %e, "could not record push failure"),
        }
    }

    fn skip(&self, reason: SkipReason) -> PushOutcome {
        debug!(
            item = %self.base.item(),
            channel = %self.base.channel(),
            action = %self.base.action(),
            reason = %reason,
            "push skipped"
        );
        PushOutcome::Skipped(reason)
    }

    fn run(&mut self, action: SyncAction, version: String, version_changed: bool) -> SyncResult<PushOutcome> {
        let engine = self.engine();
        let item = self.base.item().clone();
        let handler = engine.registry().handler(&item.entity_type, &item.bundle)?;
        if handler.ignore_push(self) {
            return Ok(self.skip(SkipReason::Ignored));
        }

        if !self.serialize(&handler, action, version)? {
            self.record_soft_failure(SkipReason::HandlerDenied)?;
            return Ok(self.skip(SkipReason::HandlerDenied));
        }

        let hash = self.operation.hash()?;
        let status = self.base.status();
        if action != SyncAction::Delete
            && self.reason != PushReason::Forced
            && !version_changed
            && status.has_push_history()
            && status.push_hash() == Some(hash.as_str())
        {
            self.record_soft_failure(SkipReason::Unchanged)?;
            return Ok(self.skip(SkipReason::Unchanged));
        }

        engine.backend().push(&self.operation)?;

        let at = self.operation.changed;
        let current = self.base.entity_type_version().to_string();
        let as_dependency = self.reason == PushReason::AsDependency;
        let record = engine.ledger().update(&item, self.base.channel(), &current, |r| {
            r.mark_pushed(at, hash.clone(), &current, action, as_dependency)
        })?;
        self.base.set_status(record);

        for child in std::mem::take(&mut self.embedded) {
            engine
                .ledger()
                .update(&child.item, self.base.channel(), &child.version, |r| {
                    r.mark_pushed_embedded(at, child.hash.clone(), &child.version, child.action, child.parent.clone())
                })?;
        }

        info!(
            item = %item,
            channel = %self.base.channel(),
            action = %action,
            reason = %self.reason,
            "pushed"
        );
        Ok(PushOutcome::Pushed { action, hash })
    }
}

impl<'a> SyncIntent<'a> for PushIntent<'a> {
    type Reason = PushReason;
    type Outcome = PushOutcome;

    fn base(&self) -> &IntentBase<'a> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase<'a> {
        &mut self.base
    }

    fn reason(&self) -> PushReason {
        self.reason
    }

    fn execute(&mut self) -> SyncResult<PushOutcome> {
        let request = self.base.request();
        let item = self.base.item().clone();
        let channel = self.base.channel().clone();
        let requested = self.base.action();

        if request.was_pulled(&item) {
            return Ok(self.skip(SkipReason::JustPulled));
        }
        let status = self.base.status();
        let has_history = status.has_push_history();
        if requested == SyncAction::Delete && !has_history {
            return Ok(self.skip(SkipReason::NeverPushed));
        }

        let mut action = requested.infer(has_history);
        let mut version = self.base.entity_type_version().to_string();
        let version_changed = has_history && status.entity_type_version() != version;
        if version_changed {
            match action {
                SyncAction::Update => action = SyncAction::Create,
                SyncAction::Delete => version = status.entity_type_version().to_string(),
                SyncAction::Create => {}
            }
        }
        self.base.set_action(action);

        if let Some(cached) = request.cached_push(requested, &item, &channel) {
            return Ok(cached);
        }
        if !request.enter(&item, &channel) {
            return Ok(self.skip(SkipReason::InProgress));
        }
        let result = self.run(action, version, version_changed);
        request.leave(&item, &channel);

        match result {
            Ok(outcome) => {
                request.cache_push(requested, &item, &channel, outcome.clone());
                Ok(outcome)
            }
            Err(error) if error.is_internal() => Err(error),
            Err(error) => {
                warn!(item = %item, channel = %channel, action = %action, error = %error, "push failed");
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
