//! The sync engine facade.

use crate::backend::Backend;
use crate::config::{Clock, EngineConfig, SystemClock};
use crate::content::ContentRepository;
use crate::context::RequestContext;
use crate::dependencies::{
    DependencyStore, MemoryDependencyStore, MissingDependencies, MissingDependency,
};
use crate::error::SyncResult;
use crate::handler::HandlerRegistry;
use crate::intent::SyncIntent;
use crate::ledger::{MemoryStatusStore, StatusLedger, StatusRecord, StatusStore};
use crate::outcome::{PullOutcome, PushOutcome, SkipReason, SyncReport};
use crate::policy::PolicyResolver;
use crate::pull::PullIntent;
use crate::push::PushIntent;
use crate::resolver::{DependencyResolver, ResolveReport};
use contentsync_protocol::{Channel, ItemRef, PullOperation, PullReason, PushReason, SyncAction};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Wires the ledger, dependency store, handlers, policy, backend and local
/// content together and runs intents against them.
///
/// The engine holds no per-request state; create a [`RequestContext`] per
/// request with [`new_request`](Self::new_request).
pub struct SyncEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    ledger: StatusLedger,
    dependencies: MissingDependencies,
    registry: HandlerRegistry,
    policy: Arc<dyn PolicyResolver>,
    backend: Arc<dyn Backend>,
    content: Arc<dyn ContentRepository>,
}

impl SyncEngine {
    /// Creates an engine with in-memory stores and the system clock.
    pub fn new(
        config: EngineConfig,
        registry: HandlerRegistry,
        policy: Arc<dyn PolicyResolver>,
        backend: Arc<dyn Backend>,
        content: Arc<dyn ContentRepository>,
    ) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ledger: StatusLedger::new(Arc::new(MemoryStatusStore::new())),
            dependencies: MissingDependencies::new(Arc::new(MemoryDependencyStore::new())),
            registry,
            policy,
            backend,
            content,
        }
    }

    /// Uses another status store.
    pub fn with_status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.ledger = StatusLedger::new(store);
        self
    }

    /// Uses another missing-dependency store.
    pub fn with_dependency_store(mut self, store: Arc<dyn DependencyStore>) -> Self {
        self.dependencies = MissingDependencies::new(store);
        self
    }

    /// Uses another clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time in unix seconds.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// The status ledger.
    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    /// The missing-dependency store.
    pub fn dependencies(&self) -> &MissingDependencies {
        &self.dependencies
    }

    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The policy resolver.
    pub fn policy(&self) -> &dyn PolicyResolver {
        self.policy.as_ref()
    }

    /// The backend client.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Local content storage.
    pub fn content(&self) -> &dyn ContentRepository {
        self.content.as_ref()
    }

    /// A dependency resolver over this engine.
    pub fn resolver(&self) -> DependencyResolver<'_> {
        DependencyResolver::new(self)
    }

    /// Starts a request scope.
    pub fn new_request(&self) -> RequestContext {
        RequestContext::new()
    }

    /// Prepares a push with the stored local item bound, if it exists.
    pub fn push_intent<'a>(
        &'a self,
        request: &'a RequestContext,
        item: &ItemRef,
        channel: &Channel,
        action: SyncAction,
        reason: PushReason,
    ) -> SyncResult<PushIntent<'a>> {
        let mut intent = PushIntent::new(
            self,
            request,
            item.clone(),
            channel.clone(),
            action,
            reason,
        )?;
        intent.load_entity()?;
        Ok(intent)
    }

    /// Pushes one item over one channel.
    pub fn push(
        &self,
        request: &RequestContext,
        item: &ItemRef,
        channel: &Channel,
        action: SyncAction,
        reason: PushReason,
    ) -> SyncResult<PushOutcome> {
        self.push_intent(request, item, channel, action, reason)?
            .execute()
    }

    /// Pushes one item over every channel the policy selects for `reason`.
    pub fn push_item(
        &self,
        request: &RequestContext,
        item: &ItemRef,
        action: SyncAction,
        reason: PushReason,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let channels = self.policy.push_channels(item, reason);
        if channels.is_empty() {
            debug!(item = %item, reason = %reason, "no channel for push");
            report.record_skip(SkipReason::NoChannel);
            return report;
        }
        for channel in channels {
            match self.push(request, item, &channel, action, reason) {
                Ok(outcome) => report.record_push(&outcome),
                Err(e) => report.record_failure(format!("{item}@{channel}"), e.to_string()),
            }
        }
        report
    }

    /// Applies one incoming operation over one channel.
    pub fn pull(
        &self,
        request: &RequestContext,
        operation: &PullOperation,
        channel: &Channel,
        reason: PullReason,
    ) -> SyncResult<PullOutcome> {
        PullIntent::new(self, request, operation, channel.clone(), reason)?.execute()
    }

    /// Applies a batch of incoming operations.
    ///
    /// Each operation goes through the first channel the policy allows for
    /// `reason`. Failures are reported, never raised.
    pub fn pull_batch(
        &self,
        request: &RequestContext,
        operations: &[PullOperation],
        reason: PullReason,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        for operation in operations {
            let Some(channel) = self.policy.pull_channels(&operation.item, reason).into_iter().next()
            else {
                debug!(item = %operation.item, reason = %reason, "no channel for pull");
                report.record_skip(SkipReason::NoChannel);
                continue;
            };
            match self.pull(request, operation, &channel, reason) {
                Ok(outcome) => report.record_pull(&outcome),
                Err(e) => {
                    warn!(item = %operation.item, error = %e, "pull failed");
                    report.record_failure(format!("{}@{channel}", operation.item), e.to_string());
                }
            }
        }
        info!(
            pulled = report.pulled,
            failed = report.failed.len(),
            total = report.total(),
            "pull batch done"
        );
        report
    }

    /// Resolves everyone waiting on an item that is available locally.
    pub fn resolve_dependencies(&self, item: &ItemRef) -> SyncResult<ResolveReport> {
        self.resolver().resolve(item)
    }

    /// Entries currently waiting on `item`.
    pub fn pending_dependencies(&self, item: &ItemRef) -> SyncResult<Vec<MissingDependency>> {
        self.dependencies.pending(&item.dependency_key())
    }

    /// The status record of an item on a channel, if one exists.
    pub fn status(&self, item: &ItemRef, channel: &Channel) -> SyncResult<Option<StatusRecord>> {
        self.ledger.get(item, channel)
    }

    /// Flags or clears a local override on a channel.
    pub fn mark_overridden_locally(
        &self,
        item: &ItemRef,
        channel: &Channel,
        overridden: bool,
    ) -> SyncResult<StatusRecord> {
        let version = self.registry.type_version(&item.entity_type, &item.bundle)?;
        self.ledger.update(item, channel, &version, |r| {
            r.set_overridden_locally(overridden)
        })
    }

    /// Enables or disables manual pushing on a channel.
    pub fn set_manual_push(
        &self,
        item: &ItemRef,
        channel: &Channel,
        enabled: bool,
    ) -> SyncResult<StatusRecord> {
        let version = self.registry.type_version(&item.entity_type, &item.bundle)?;
        self.ledger.update(item, channel, &version, |r| {
            r.set_manual_push_enabled(enabled)
        })
    }

    /// Sends every registered type definition to a pool.
    pub fn export_type_definitions(&self, pool_id: &str) -> SyncResult<usize> {
        let types = self.registry.registered_types();
        for (entity_type, bundle) in &types {
            let definition = self.registry.type_definition(entity_type, bundle)?;
            self.backend.export_type(&definition, pool_id)?;
            debug!(entity_type = %entity_type, bundle = %bundle, pool = %pool_id, "exported type");
        }
        Ok(types.len())
    }
}
