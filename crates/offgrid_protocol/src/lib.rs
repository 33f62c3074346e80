//! # offgrid Protocol
//!
//! Request, response and sync log types shared by the offgrid crates.
//!
//! This crate provides:
//! - [`Request`] / [`Response`] values and the [`Network`] seam
//! - [`Fingerprint`] derivation for cache and queue correlation
//! - [`SyncLogEntry`] and its forward-only [`EntryStatus`] machine
//! - [`Conflict`] detail and [`ConflictPolicy`]
//!
//! This is a pure types crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod fingerprint;
mod http;
mod network;
mod operation;

pub use conflict::{Conflict, ConflictPolicy, ConflictResolution};
pub use error::{ProtocolError, ProtocolResult};
pub use fingerprint::{normalize_url, Fingerprint};
pub use http::{
    parse_url, path_has_prefix, paths_related, url_path, Headers, Method, Request, Response,
    CONTENT_TYPE_HEADER, DEFAULT_OVERWRITE_HEADER, ETAG_HEADER, IF_MATCH_HEADER,
    OPERATION_ID_HEADER, QUEUED_HEADER,
};
pub use network::{Network, NetworkError};
pub use operation::{EntryStatus, FailureKind, OperationKind, SyncLogEntry};
