//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while opening or using a key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be initialized (quota denied, directory
    /// unavailable, database cannot be opened).
    #[error("failed to initialize store '{store}': {reason}")]
    Init {
        /// Store name.
        store: String,
        /// Why initialization failed.
        reason: String,
    },

    /// No factory is registered under the requested backend id.
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    /// A factory is already registered under this backend id.
    #[error("storage backend already registered: {0}")]
    DuplicateBackend(String),

    /// The backend ran out of space for the write.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The store name, version or key cannot be used to derive raw keys.
    #[error("invalid keyspace: {0}")]
    InvalidKeySpace(String),

    /// The backend cannot answer structured queries.
    #[error("backend '{backend}' does not support queries")]
    QueryUnsupported {
        /// Backend id.
        backend: &'static str,
    },

    /// The backend lacks a capability the caller required.
    #[error("backend '{backend}' lacks required capability: {capability}")]
    MissingCapability {
        /// Backend id.
        backend: String,
        /// Name of the missing capability.
        capability: &'static str,
    },

    /// The store is already open under a different version.
    #[error("store '{store}' is open with version {open}, requested {requested}")]
    VersionMismatch {
        /// Store name.
        store: String,
        /// Version of the cached handle.
        open: String,
        /// Version the caller asked for.
        requested: String,
    },

    /// Another process holds the lock on a file store root.
    #[error("store directory is locked by another process: {0}")]
    Locked(String),

    /// The store has been closed.
    #[error("store '{0}' is closed")]
    Closed(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The document database reported an error.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Creates an initialization error for the named store.
    pub fn init(store: impl Into<String>, reason: impl ToString) -> Self {
        Self::Init {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the caller may recover by evicting data and retrying.
    pub fn is_quota(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Io(io::Error::other(err))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}
