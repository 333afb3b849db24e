//! Error types for the local event store.

use crate::event::{EventId, RemoteId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred on the durable medium.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the journal lock.
    #[error("journal locked: another process has exclusive access to {path:?}")]
    Locked {
        /// Path of the locked journal.
        path: PathBuf,
    },

    /// The medium refused the write (read-only, full, detached).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The journal contents could not be interpreted.
    #[error("journal corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A journal payload failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// A second row would share an existing remote id.
    #[error("remote id {remote_id} already belongs to event {existing}")]
    DuplicateRemoteId {
        /// The contested remote id.
        remote_id: RemoteId,
        /// The row that already holds it.
        existing: EventId,
    },

    /// No event with the given id.
    #[error("event not found: {0}")]
    NotFound(EventId),

    /// The event already carries a remote id.
    #[error("event {id} is already confirmed as {remote_id}")]
    AlreadyConfirmed {
        /// The local event.
        id: EventId,
        /// The remote id it already holds.
        remote_id: RemoteId,
    },
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a duplicate remote id error.
    pub fn duplicate(remote_id: RemoteId, existing: EventId) -> Self {
        Self::DuplicateRemoteId {
            remote_id,
            existing,
        }
    }

    /// Returns true if the error comes from the storage medium rather than
    /// from the request itself.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Locked { .. }
                | StoreError::Unavailable(_)
                | StoreError::Corrupted { .. }
                | StoreError::Codec(_)
        )
    }
}
