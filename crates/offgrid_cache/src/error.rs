//! Error types for the request cache.

use offgrid_shred::ShredError;
use offgrid_storage::StoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in the request cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The network failed and nothing usable was cached.
    #[error("network unavailable and no cached response: {0}")]
    NetworkUnavailable(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Storage backend error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A cache entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Reassembling a shredded response failed.
    #[error("shredding error: {0}")]
    Shred(#[from] ShredError),
}

impl CacheError {
    /// Returns true if the failure came from the network rather than from
    /// local state.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, CacheError::NetworkUnavailable(_) | CacheError::Cancelled)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
