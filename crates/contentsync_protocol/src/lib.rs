//! # contentsync protocol
//!
//! Item identity, operation shapes and content hashing for contentsync.
//!
//! This crate provides:
//! - [`ItemRef`] and [`Channel`] for addressing one item on one replication channel
//! - [`SyncAction`], [`PushReason`] and [`PullReason`]
//! - [`PushOperation`] (what a site sends) and [`PullOperation`] (what a site receives)
//! - [`EntityReference`] for reference, dependency and embed links between items
//! - [`content_hash`] for the stable per-operation fingerprint
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod error;
mod hash;
mod item;
mod operation;
mod reference;

pub use action::{PullReason, PushReason, SyncAction};
pub use error::{ProtocolError, ProtocolResult};
pub use hash::{content_hash, to_cbor};
pub use item::{Channel, ItemRef};
pub use operation::{PropertyMap, PullOperation, PushOperation};
pub use reference::{EntityReference, ReferenceKind};

/// Field values and operation properties are plain JSON values.
pub use serde_json::Value;
