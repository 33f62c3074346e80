//! Configuration for the sync manager.

use offgrid_protocol::{path_has_prefix, ConflictPolicy, DEFAULT_OVERWRITE_HEADER};
use serde::{Deserialize, Serialize};

/// What replay does after a transport failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Defer later entries whose path is related to the failed one; keep
    /// replaying unrelated entries.
    #[default]
    HaltRelated,
    /// Stop the run.
    HaltAll,
    /// Keep replaying every later entry.
    Continue,
}

/// Conflict policy for every path under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRule {
    /// Path prefix, matched segment-wise.
    pub path_prefix: String,
    /// Policy for matching entries.
    pub policy: ConflictPolicy,
}

/// Configuration for a [`crate::SyncManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Per-endpoint conflict policies; the longest matching prefix wins.
    pub conflict_rules: Vec<ConflictRule>,
    /// Policy for entries no rule matches.
    pub default_policy: ConflictPolicy,
    /// Behavior after a transport failure.
    pub failure_policy: FailurePolicy,
    /// Keep submitted entries in the log instead of removing them.
    pub retain_submitted: bool,
    /// Statuses treated as conflicts.
    pub conflict_statuses: Vec<u16>,
    /// Header sent on client-wins resubmission.
    pub overwrite_header: String,
    /// Entries that failed this many attempts are no longer replayed
    /// automatically.
    pub max_attempts: Option<u32>,
    /// Headers included in fingerprints of enqueued requests.
    pub relevant_headers: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_rules: Vec::new(),
            default_policy: ConflictPolicy::default(),
            failure_policy: FailurePolicy::default(),
            retain_submitted: true,
            conflict_statuses: vec![409, 412],
            overwrite_header: DEFAULT_OVERWRITE_HEADER.to_string(),
            max_attempts: None,
            relevant_headers: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `policy` for paths under `prefix`.
    #[must_use]
    pub fn with_conflict_policy(mut self, prefix: impl Into<String>, policy: ConflictPolicy) -> Self {
        self.conflict_rules.push(ConflictRule {
            path_prefix: prefix.into(),
            policy,
        });
        self
    }

    /// Sets the policy for unmatched paths.
    #[must_use]
    pub fn with_default_policy(mut self, policy: ConflictPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets whether submitted entries stay in the log.
    #[must_use]
    pub fn with_retain_submitted(mut self, retain: bool) -> Self {
        self.retain_submitted = retain;
        self
    }

    /// Sets the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns the conflict policy for a request path.
    #[must_use]
    pub fn policy_for(&self, path: &str) -> ConflictPolicy {
        self.conflict_rules
            .iter()
            .filter(|rule| path_has_prefix(&rule.path_prefix, path))
            .max_by_key(|rule| rule.path_prefix.len())
            .map_or(self.default_policy, |rule| rule.policy)
    }

    /// Returns true if `status` is a conflict.
    #[must_use]
    pub fn is_conflict(&self, status: u16) -> bool {
        self.conflict_statuses.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let config = SyncConfig::new()
            .with_conflict_policy("/users", ConflictPolicy::ServerWins)
            .with_conflict_policy("/users/admins", ConflictPolicy::ClientWins);

        assert_eq!(config.policy_for("/users/1"), ConflictPolicy::ServerWins);
        assert_eq!(config.policy_for("/users/admins/3"), ConflictPolicy::ClientWins);
        assert_eq!(config.policy_for("/usersx"), ConflictPolicy::Manual);
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert!(config.is_conflict(409));
        assert!(config.is_conflict(412));
        assert!(!config.is_conflict(400));
        assert!(config.retain_submitted);
        assert_eq!(config.failure_policy, FailurePolicy::HaltRelated);
    }

    #[test]
    fn loads_from_json() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "conflict_rules": [{"path_prefix": "/notes", "policy": "client_wins"}],
                "failure_policy": "continue"
            }"#,
        )
        .unwrap();
        assert_eq!(config.policy_for("/notes/9"), ConflictPolicy::ClientWins);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.conflict_statuses, vec![409, 412]);
    }
}
