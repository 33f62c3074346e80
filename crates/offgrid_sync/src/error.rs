//! Error types for the sync manager.

use offgrid_protocol::ProtocolError;
use offgrid_storage::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync manager.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The sync log store failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// An entry was moved against its status machine.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// The request or call is not valid for the entry or queue.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// No entry with this sequence number exists.
    #[error("sync log entry {0} not found")]
    EntryNotFound(u64),

    /// An entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Returns true if the failure is in the local store and the call can
    /// be repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Store(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidTransition { from, to } => SyncError::InvalidTransition { from, to },
            ProtocolError::Json(msg) => SyncError::Serialization(msg),
            other => SyncError::InvalidOperation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
