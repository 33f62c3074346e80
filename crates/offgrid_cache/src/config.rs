//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::RequestCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for entries stored without an explicit one. `None` never expires.
    pub default_ttl: Option<Duration>,
    /// Serve expired entries when the network is unavailable.
    pub serve_stale_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            serve_stale_on_error: true,
        }
    }
}

impl CacheConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Sets whether expired entries may be served offline.
    #[must_use]
    pub fn with_serve_stale_on_error(mut self, serve: bool) -> Self {
        self.serve_stale_on_error = serve;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_partial_json() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"default_ttl": {"secs": 60, "nanos": 0}}"#).unwrap();
        assert_eq!(config.default_ttl, Some(Duration::from_secs(60)));
        assert!(config.serve_stale_on_error);
    }
}
