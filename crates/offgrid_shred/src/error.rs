//! Error types for shredding.

use offgrid_storage::StoreError;
use thiserror::Error;

/// Result type for shredding operations.
pub type ShredResult<T> = Result<T, ShredError>;

/// Errors raised while shredding or reassembling payloads.
///
/// Shredding errors are recoverable: callers typically fall back to caching
/// the raw response.
#[derive(Error, Debug)]
pub enum ShredError {
    /// A record lacks the configured id field.
    #[error("{resource_type} record is missing id field '{field}'")]
    MissingId {
        /// Resource type being shredded.
        resource_type: String,
        /// Configured id field.
        field: String,
    },

    /// The payload does not have a shape the strategy understands.
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),

    /// Two copies of one record in the same payload disagree, so a single
    /// stored record cannot reproduce both.
    #[error("payload holds conflicting copies of record {0}")]
    ConflictingCopies(String),

    /// No strategy is registered under the name.
    #[error("unknown shredding strategy: {0}")]
    UnknownStrategy(String),

    /// Reading or writing resource records failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The payload is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
