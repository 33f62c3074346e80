//! The network seam.

use crate::http::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a [`Network`] call. HTTP error statuses are not errors; they
/// arrive as a [`Response`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The remote could not be reached.
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete in time.
    #[error("network request timed out")]
    Timeout,

    /// The caller cancelled the call.
    #[error("network request cancelled")]
    Cancelled,

    /// Any other transport failure.
    #[error("network error: {0}")]
    Other(String),
}

impl NetworkError {
    /// Returns true if retrying later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NetworkError::Cancelled)
    }
}

/// A `fetch(request) -> response` function.
///
/// Implementations perform the actual HTTP exchange; the interceptor and
/// the sync manager only ever see this trait, so tests substitute a mock.
#[async_trait]
pub trait Network: Send + Sync {
    /// Sends `request` and returns the response.
    ///
    /// # Errors
    ///
    /// Returns a [`NetworkError`] if no response was received.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

#[async_trait]
impl<N: Network + ?Sized> Network for Arc<N> {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        (**self).fetch(request).await
    }
}
