//! Error types for the sync engine.

use contentsync_protocol::{ProtocolError, SyncAction};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Policy declines are not errors; they are reported as a
/// [`SkipReason`](crate::SkipReason) on the outcome.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote backend rejected or failed the request.
    #[error("backend error: {message}")]
    Backend {
        /// Error message from the backend client.
        message: String,
        /// Whether a later pass may succeed.
        retryable: bool,
    },

    /// The remote backend did not answer in time.
    #[error("backend timed out")]
    Timeout,

    /// The item could not be serialized or a required reference is missing.
    #[error("data error: {0}")]
    Data(String),

    /// Status ledger or missing-dependency persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation encoding or reference parsing failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No handler is registered for the item's type.
    #[error("no handler registered for {entity_type}.{bundle}")]
    NoHandler {
        /// Entity type.
        entity_type: String,
        /// Bundle.
        bundle: String,
    },

    /// An intent was asked to bind a local item twice.
    #[error("intent for {item} is already bound to a local item")]
    AlreadyBound {
        /// The item the intent was created for.
        item: String,
    },

    /// A push or pull failed; carries what was being attempted.
    #[error("failed to {action} {item} ({reason}): {source}")]
    Intent {
        /// Item the intent was created for.
        item: String,
        /// Action being executed.
        action: SyncAction,
        /// Push or pull reason.
        reason: String,
        /// The underlying error.
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Creates a retryable backend error.
    pub fn backend_retryable(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable backend error.
    pub fn backend_fatal(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Returns true if a later pass may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Backend { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Intent { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for programming errors that must not be recorded as
    /// ordinary sync failures.
    pub fn is_internal(&self) -> bool {
        match self {
            SyncError::AlreadyBound { .. } => true,
            SyncError::Intent { source, .. } => source.is_internal(),
            _ => false,
        }
    }

    /// The innermost error, skipping intent wrappers.
    pub fn root_cause(&self) -> &SyncError {
        match self {
            SyncError::Intent { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::backend_retryable("503").is_retryable());
        assert!(!SyncError::backend_fatal("401").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::data("bad field").is_retryable());
    }

    #[test]
    fn intent_wrapper_delegates() {
        let err = SyncError::Intent {
            item: "node.article:n1".into(),
            action: SyncAction::Create,
            reason: "automatic".into(),
            source: Box::new(SyncError::Timeout),
        };
        assert!(err.is_retryable());
        assert!(matches!(err.root_cause(), SyncError::Timeout));
        assert!(err.to_string().contains("create node.article:n1"));
    }

    #[test]
    fn already_bound_is_internal() {
        let err = SyncError::AlreadyBound {
            item: "node.article:n1".into(),
        };
        assert!(err.is_internal());
        assert!(!SyncError::Timeout.is_internal());
    }
}
