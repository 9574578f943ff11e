//! Remote backend client abstraction.

use crate::error::{SyncError, SyncResult};
use crate::handler::TypeDefinition;
use contentsync_protocol::{Channel, ItemRef, PullOperation, PullReason, PushOperation};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// The remote backend that brokers operations between sites.
///
/// Timeouts and cancellation belong to the implementation; the engine only
/// sees the resulting error.
pub trait Backend: Send + Sync {
    /// Sends one push operation.
    fn push(&self, operation: &PushOperation) -> SyncResult<()>;

    /// Asks the backend to deliver `item` again on `channel`.
    fn request_pull(&self, item: &ItemRef, channel: &Channel, reason: PullReason) -> SyncResult<()>;

    /// Publishes a type definition to a pool.
    fn export_type(&self, definition: &TypeDefinition, pool_id: &str) -> SyncResult<()>;
}

/// A recorded pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// Requested item.
    pub item: ItemRef,
    /// Channel it was requested on.
    pub channel: Channel,
    /// Reason passed along.
    pub reason: PullReason,
}

#[derive(Debug, Clone)]
enum InjectedFailure {
    Retryable(String),
    Fatal(String),
}

impl InjectedFailure {
    fn to_error(&self) -> SyncError {
        match self {
            InjectedFailure::Retryable(message) => SyncError::backend_retryable(message.clone()),
            InjectedFailure::Fatal(message) => SyncError::backend_fatal(message.clone()),
        }
    }
}

/// An in-memory backend that records everything it receives.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    pushes: Mutex<Vec<PushOperation>>,
    pull_requests: Mutex<Vec<PullRequest>>,
    types: Mutex<Vec<(TypeDefinition, String)>>,
    push_failures: Mutex<HashMap<String, InjectedFailure>>,
    pull_failures: Mutex<HashMap<String, InjectedFailure>>,
    timed_out: AtomicBool,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every push of `uuid` with a retryable error.
    pub fn fail_pushes_for(&self, uuid: impl Into<String>, message: impl Into<String>) {
        self.push_failures
            .lock()
            .insert(uuid.into(), InjectedFailure::Retryable(message.into()));
    }

    /// Fails every push of `uuid` with a non-retryable error.
    pub fn reject_pushes_for(&self, uuid: impl Into<String>, message: impl Into<String>) {
        self.push_failures
            .lock()
            .insert(uuid.into(), InjectedFailure::Fatal(message.into()));
    }

    /// Fails every pull request for `uuid`.
    pub fn fail_pull_requests_for(&self, uuid: impl Into<String>, message: impl Into<String>) {
        self.pull_failures
            .lock()
            .insert(uuid.into(), InjectedFailure::Retryable(message.into()));
    }

    /// Removes all injected failures.
    pub fn heal(&self) {
        self.push_failures.lock().clear();
        self.pull_failures.lock().clear();
        self.timed_out.store(false, Ordering::SeqCst);
    }

    /// Makes every call time out.
    pub fn set_timed_out(&self, timed_out: bool) {
        self.timed_out.store(timed_out, Ordering::SeqCst);
    }

    /// Every push received, in order.
    pub fn pushes(&self) -> Vec<PushOperation> {
        self.pushes.lock().clone()
    }

    /// Number of pushes received.
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    /// Pushes received for one uuid, in order.
    pub fn pushes_for(&self, uuid: &str) -> Vec<PushOperation> {
        self.pushes
            .lock()
            .iter()
            .filter(|op| op.item.uuid == uuid)
            .cloned()
            .collect()
    }

    /// Every pull request received, in order.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_requests.lock().clone()
    }

    /// Every exported type definition with its pool.
    pub fn exported_types(&self) -> Vec<(TypeDefinition, String)> {
        self.types.lock().clone()
    }

    /// The last push of `uuid` as another site would receive it.
    pub fn deliver(&self, uuid: &str) -> Option<PullOperation> {
        self.pushes_for(uuid).pop().map(PullOperation::from)
    }

    /// Drains all recorded pushes as incoming operations, in push order.
    pub fn drain_deliveries(&self) -> Vec<PullOperation> {
        self.pushes
            .lock()
            .drain(..)
            .map(PullOperation::from)
            .collect()
    }

    fn check_timeout(&self) -> SyncResult<()> {
        if self.timed_out.load(Ordering::SeqCst) {
            return Err(SyncError::Timeout);
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn push(&self, operation: &PushOperation) -> SyncResult<()> {
        self.check_timeout()?;
        if let Some(failure) = self.push_failures.lock().get(&operation.item.uuid) {
            return Err(failure.to_error());
        }
        self.pushes.lock().push(operation.clone());
        Ok(())
    }

    fn request_pull(&self, item: &ItemRef, channel: &Channel, reason: PullReason) -> SyncResult<()> {
        self.check_timeout()?;
        if let Some(failure) = self.pull_failures.lock().get(&item.uuid) {
            return Err(failure.to_error());
        }
        self.pull_requests.lock().push(PullRequest {
            item: item.clone(),
            channel: channel.clone(),
            reason,
        });
        Ok(())
    }

    fn export_type(&self, definition: &TypeDefinition, pool_id: &str) -> SyncResult<()> {
        self.check_timeout()?;
        self.types
            .lock()
            .push((definition.clone(), pool_id.to_string()));
        Ok(())
    }
}
