//! Error types for the interceptor.

use offgrid_cache::CacheError;
use offgrid_protocol::NetworkError;
use offgrid_sync::SyncError;
use thiserror::Error;

/// Result type for interceptor operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors returned by [`crate::FetchInterceptor`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The network failed and nothing cached could answer the read.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Cache storage failed.
    #[error("cache error: {0}")]
    Cache(CacheError),

    /// The write could not be queued.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A write failed in transport and no sync queue is attached.
    #[error("network error: {0}")]
    Network(NetworkError),
}

impl FetchError {
    /// Returns true if the failure means "no connectivity" rather than a
    /// local fault.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, FetchError::NetworkUnavailable(_) | FetchError::Network(_))
    }
}

impl From<CacheError> for FetchError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NetworkUnavailable(message) => FetchError::NetworkUnavailable(message),
            CacheError::Cancelled => FetchError::Cancelled,
            other => FetchError::Cache(other),
        }
    }
}

impl From<NetworkError> for FetchError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Cancelled => FetchError::Cancelled,
            other => FetchError::Network(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_network_errors_surface_directly() {
        let err = FetchError::from(CacheError::NetworkUnavailable("down".into()));
        assert!(matches!(err, FetchError::NetworkUnavailable(_)));
        assert!(err.is_offline());
        assert!(matches!(
            FetchError::from(CacheError::Cancelled),
            FetchError::Cancelled
        ));
        assert!(matches!(
            FetchError::from(NetworkError::Cancelled),
            FetchError::Cancelled
        ));
        assert!(!FetchError::Cancelled.is_offline());
    }
}
