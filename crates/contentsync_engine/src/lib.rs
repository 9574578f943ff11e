//! # Content Sync Engine
//!
//! Synchronization intent engine for replicating content items between
//! sites through a central backend.
//!
//! This crate provides:
//! - Status ledger (per item and channel replication state)
//! - Push intents with action inference and hash deduplication
//! - Pull intents with embedded items and local-override merging
//! - Missing-dependency store and dependency resolver
//! - Handler registry, policy resolver and backend abstractions
//!
//! ## Architecture
//!
//! A caller creates one [`RequestContext`] per request and runs push or pull
//! intents for (item, channel) pairs through the [`SyncEngine`]:
//! 1. The intent looks up (or lazily creates) the item's [`StatusRecord`]
//! 2. The action is inferred from the record's history
//! 3. The type's [`EntityHandler`] serializes or applies the item
//! 4. The backend is called and the record is updated
//! 5. Pulls resolve every item that was waiting on the pulled one
//!
//! ## Key Invariants
//!
//! - One status record per (item, channel), created on first use
//! - Push and pull timestamps only move forward
//! - The same (action, item, channel) runs at most once per request
//! - An item pulled in a request is never pushed back in that request
//! - Hard failures are recorded and returned, never swallowed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod content;
mod context;
mod dependencies;
mod engine;
mod error;
mod file_store;
mod handler;
mod intent;
mod ledger;
mod outcome;
mod policy;
mod pull;
mod push;
mod resolver;

pub use backend::{Backend, MemoryBackend, PullRequest};
pub use config::{Clock, EngineConfig, FixedClock, SystemClock};
pub use content::{ContentRepository, LocalItem, MemoryContentRepository};
pub use context::RequestContext;
pub use dependencies::{DependencyStore, MemoryDependencyStore, MissingDependencies, MissingDependency};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use file_store::FileStatusStore;
pub use handler::{
    ChangeTimeResolver, EmbeddedFileChangeTime, EntityHandler, HandlerRegistry, OwnChangeTime,
    TypeDefinition, ANY_BUNDLE,
};
pub use intent::{IntentBase, SyncIntent};
pub use ledger::{
    Failure, FailureKind, MemoryStatusStore, StatusKey, StatusLedger, StatusRecord, StatusStore,
};
pub use outcome::{PullOutcome, PushOutcome, SkipReason, SyncReport};
pub use policy::{PolicyResolver, PolicyRule, PoolUsage, PullMode, PushMode, StaticPolicy};
pub use pull::PullIntent;
pub use push::PushIntent;
pub use resolver::{DependencyResolver, ResolveReport};
