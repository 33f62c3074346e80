//! Queued write operations and their status machine.

use crate::conflict::Conflict;
use crate::error::{ProtocolError, ProtocolResult};
use crate::fingerprint::Fingerprint;
use crate::http::{Headers, Method, Request, OPERATION_ID_HEADER};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Creates a resource (POST).
    Add,
    /// Replaces or patches a resource (PUT, PATCH).
    Update,
    /// Deletes a resource (DELETE).
    Remove,
}

impl OperationKind {
    /// Classifies a method. Returns `None` for read-only methods.
    #[must_use]
    pub fn from_method(method: Method) -> Option<Self> {
        match method {
            Method::Post => Some(OperationKind::Add),
            Method::Put | Method::Patch => Some(OperationKind::Update),
            Method::Delete => Some(OperationKind::Remove),
            Method::Get | Method::Head | Method::Options => None,
        }
    }
}

/// Status of a sync log entry.
///
/// ```text
/// Pending ──> Submitting ──> Submitted
///    ^             │
///    │             v
///    └───────── Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for replay.
    Pending,
    /// Handed to the network.
    Submitting,
    /// Accepted by the remote (or discarded by conflict policy). Terminal.
    Submitted,
    /// Replay failed; may be reset to `Pending`.
    Failed,
}

impl EntryStatus {
    /// Returns true if the status machine allows `self -> next`.
    #[must_use]
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        matches!(
            (self, next),
            (EntryStatus::Pending, EntryStatus::Submitting)
                | (EntryStatus::Submitting, EntryStatus::Submitted)
                | (EntryStatus::Submitting, EntryStatus::Failed)
                | (EntryStatus::Failed, EntryStatus::Pending)
        )
    }

    /// Returns true if replay should consider this entry.
    #[must_use]
    pub fn is_replayable(self) -> bool {
        matches!(self, EntryStatus::Pending | EntryStatus::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Submitting => "submitting",
            EntryStatus::Submitted => "submitted",
            EntryStatus::Failed => "failed",
        };
        f.pad(name)
    }
}

/// Why the last replay attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Network unreachable, timeout or 5xx. Retried automatically.
    Transport,
    /// The remote refused the write with a non-conflict 4xx. Not retried
    /// automatically.
    Rejected {
        /// Status returned by the remote.
        status: u16,
    },
    /// Unresolved conflict under the manual policy.
    Conflict,
    /// The process stopped while the entry was in flight.
    Interrupted,
}

impl FailureKind {
    /// Returns true if `sync` retries entries failed this way.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transport | FailureKind::Interrupted)
    }
}

/// One queued write in the durable sync log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Position in the log; defines replay order.
    pub sequence: u64,
    /// Client-generated id, sent as [`OPERATION_ID_HEADER`].
    pub operation_id: Uuid,
    /// Kind of write.
    pub operation: OperationKind,
    /// Fingerprint of the original request.
    pub fingerprint: Fingerprint,
    /// Method of the original request.
    pub method: Method,
    /// Target URL.
    pub endpoint: String,
    /// Headers of the original request.
    #[serde(default)]
    pub headers: Headers,
    /// Body of the original request.
    #[serde(default)]
    pub payload: Option<Bytes>,
    /// When the entry was appended.
    pub enqueued_at: DateTime<Utc>,
    /// Current status.
    pub status: EntryStatus,
    /// Number of submissions attempted.
    #[serde(default)]
    pub attempts: u32,
    /// Message of the last failure.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Classification of the last failure.
    #[serde(default)]
    pub failure: Option<FailureKind>,
    /// Conflict detail, set under the manual policy.
    #[serde(default)]
    pub conflict: Option<Conflict>,
}

impl SyncLogEntry {
    /// Builds a pending entry from a mutating request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownMethod`] if the request is read-only.
    pub fn from_request(
        sequence: u64,
        request: &Request,
        fingerprint: Fingerprint,
    ) -> ProtocolResult<Self> {
        let operation = OperationKind::from_method(request.method).ok_or_else(|| {
            ProtocolError::UnknownMethod(format!("{} is not a write", request.method))
        })?;
        Ok(Self {
            sequence,
            operation_id: Uuid::new_v4(),
            operation,
            fingerprint,
            method: request.method,
            endpoint: request.url.clone(),
            headers: request.headers.clone(),
            payload: request.body.clone(),
            enqueued_at: Utc::now(),
            status: EntryStatus::Pending,
            attempts: 0,
            last_error: None,
            failure: None,
            conflict: None,
        })
    }

    /// Rebuilds the request to submit, tagged with the operation id.
    #[must_use]
    pub fn to_request(&self) -> Request {
        let mut request = Request::new(self.method, self.endpoint.clone());
        request.headers = self.headers.clone();
        request.body = self.payload.clone();
        request.with_header(OPERATION_ID_HEADER, self.operation_id.to_string())
    }

    /// Returns the endpoint path, which groups entries into dependency
    /// chains.
    #[must_use]
    pub fn path(&self) -> String {
        crate::http::url_path(&self.endpoint)
    }

    /// Moves the entry to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidTransition`] if the move is not
    /// allowed; the entry is unchanged.
    pub fn transition(&mut self, next: EntryStatus) -> ProtocolResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        match next {
            EntryStatus::Submitting => self.attempts += 1,
            EntryStatus::Submitted | EntryStatus::Pending => {
                self.failure = None;
                self.last_error = None;
            }
            EntryStatus::Failed => {}
        }
        Ok(())
    }

    /// Moves a submitting entry to `Failed`, recording why.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidTransition`] unless the entry is
    /// `Submitting`.
    pub fn fail(&mut self, failure: FailureKind, message: impl Into<String>) -> ProtocolResult<()> {
        self.transition(EntryStatus::Failed)?;
        self.failure = Some(failure);
        self.last_error = Some(message.into());
        Ok(())
    }
}
