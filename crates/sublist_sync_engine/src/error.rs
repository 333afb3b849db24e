//! Error types for the sync engine.

use sublist_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store could not be reached.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// The remote store refused the request (quota, auth, conflict).
    #[error("remote rejected request: {reason}")]
    RemoteRejected {
        /// Reason given by the remote.
        reason: String,
    },

    /// A remote operation did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A request or response could not be encoded or understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The subscription handle could not be loaded or saved.
    #[error("subscription error: {0}")]
    Subscription(String),
}

impl SyncError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::RemoteRejected {
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { .. } | SyncError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sublist_store::EventId;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection reset").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::rejected("quota exceeded").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Protocol("bad body".into()).is_retryable());
        assert!(!SyncError::from(StoreError::Unavailable("disk full".into())).is_retryable());
        assert!(!SyncError::from(StoreError::NotFound(EventId::new())).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::rejected("quota exceeded");
        assert_eq!(err.to_string(), "remote rejected request: quota exceeded");
        assert_eq!(SyncError::Timeout.to_string(), "operation timed out");
    }
}
