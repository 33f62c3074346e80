//! Conflict detail and resolution policies.

use crate::fingerprint::Fingerprint;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A replayed write that the remote refused because its assumed prior
/// state no longer matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Sequence of the conflicting log entry.
    pub sequence: u64,
    /// Fingerprint of the conflicting request.
    pub fingerprint: Fingerprint,
    /// Target URL.
    pub endpoint: String,
    /// Status the remote answered with.
    pub status: u16,
    /// Body the client tried to write.
    #[serde(default)]
    pub local: Option<Bytes>,
    /// Body the remote returned with the conflict, usually its current state.
    #[serde(default)]
    pub remote: Option<Bytes>,
    /// Entity tag of the remote state, if reported.
    #[serde(default)]
    pub remote_etag: Option<String>,
    /// Resolution, once decided.
    #[serde(default)]
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Resolves the conflict.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }

    /// Returns true if the conflict has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Returns the remote body decoded as JSON, if it is JSON.
    #[must_use]
    pub fn remote_json(&self) -> Option<serde_json::Value> {
        self.remote
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// Resolution for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Resubmit the local write with overwrite semantics.
    KeepLocal,
    /// Discard the local write.
    AcceptRemote,
}

/// Policy for resolving conflicts during replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Discard the local change.
    ServerWins,
    /// Force-resubmit with overwrite semantics.
    ClientWins,
    /// Mark the entry failed and surface the conflict.
    #[default]
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy resolves conflicts without the caller.
    #[must_use]
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Resolves `conflict` per this policy. Returns the resolution, or
    /// `None` under [`ConflictPolicy::Manual`].
    pub fn resolve(&self, conflict: &mut Conflict) -> Option<ConflictResolution> {
        let resolution = match self {
            ConflictPolicy::ServerWins => ConflictResolution::AcceptRemote,
            ConflictPolicy::ClientWins => ConflictResolution::KeepLocal,
            ConflictPolicy::Manual => return None,
        };
        conflict.resolve(resolution);
        Some(resolution)
    }
}
