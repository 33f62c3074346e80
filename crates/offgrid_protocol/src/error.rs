//! Error types for protocol types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by protocol types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A sync log entry was moved against its state machine.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// A URL could not be parsed.
    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    /// A body was not valid JSON.
    #[error("invalid json body: {0}")]
    Json(String),

    /// The method name is not recognized.
    #[error("unknown http method '{0}'")]
    UnknownMethod(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Json(err.to_string())
    }
}
