//! # Content Sync Testkit
//!
//! Test utilities for the content sync engine.
//!
//! This crate provides:
//! - A generic field-copying handler with reference, dependency and embed fields
//! - Ready-made node, term, media, file and paragraph items
//! - A standard policy and a fully wired in-memory site
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use contentsync_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_an_article() {
//!     let site = TestSite::new("site-a");
//!     let node = site.save(article("n1", "Hello"));
//!     let request = site.engine.new_request();
//!     let report = site.engine.push_item(&request, &node.reference, SyncAction::Create, PushReason::Automatic);
//!     assert_eq!(report.pushed, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod handlers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::handlers::*;
    pub use contentsync_engine::*;
    pub use contentsync_protocol::*;
}

pub use fixtures::*;
pub use generators::*;
pub use handlers::*;
