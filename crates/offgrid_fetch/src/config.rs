//! Per-endpoint routing configuration.

use offgrid_cache::CacheStrategy;
use offgrid_protocol::path_has_prefix;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How requests to one endpoint are handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Strategy for reads.
    pub cache_strategy: CacheStrategy,
    /// Shredding strategy for cached reads; raw caching if unset.
    pub shredding: Option<String>,
    /// Resource type for shredded records.
    pub resource_type: Option<String>,
    /// Lifetime of cached reads; falls back to the cache default.
    pub ttl: Option<Duration>,
    /// Answer queued writes with a synthesized response.
    pub optimistic: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            cache_strategy: CacheStrategy::NetworkFirst,
            shredding: None,
            resource_type: None,
            ttl: None,
            optimistic: false,
        }
    }
}

impl EndpointConfig {
    /// Creates a configuration with the given read strategy.
    #[must_use]
    pub fn new(cache_strategy: CacheStrategy) -> Self {
        Self {
            cache_strategy,
            ..Self::default()
        }
    }

    /// Shreds cached reads with `strategy` into records of `resource_type`.
    #[must_use]
    pub fn with_shredding(
        mut self,
        strategy: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        self.shredding = Some(strategy.into());
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Sets the lifetime of cached reads.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Enables or disables optimistic responses for queued writes.
    #[must_use]
    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }
}

/// An [`EndpointConfig`] applied to every path under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    /// Path prefix, matched on segment boundaries.
    pub path_prefix: String,
    /// Configuration for matching paths.
    pub endpoint: EndpointConfig,
}

/// Configuration for [`crate::FetchInterceptor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Per-prefix rules; the longest matching prefix wins.
    pub rules: Vec<EndpointRule>,
    /// Configuration for paths no rule matches.
    pub default: EndpointConfig,
    /// Headers that take part in request fingerprints.
    pub relevant_headers: Vec<String>,
}

impl InterceptorConfig {
    /// Creates a configuration with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for paths under `prefix`.
    #[must_use]
    pub fn with_endpoint(mut self, prefix: impl Into<String>, endpoint: EndpointConfig) -> Self {
        self.rules.push(EndpointRule {
            path_prefix: prefix.into(),
            endpoint,
        });
        self
    }

    /// Sets the configuration for unmatched paths.
    #[must_use]
    pub fn with_default(mut self, endpoint: EndpointConfig) -> Self {
        self.default = endpoint;
        self
    }

    /// Sets the headers that take part in fingerprints.
    #[must_use]
    pub fn with_relevant_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relevant_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the rule matching `path`, if any.
    #[must_use]
    pub fn rule_for(&self, path: &str) -> Option<&EndpointRule> {
        self.rules
            .iter()
            .filter(|rule| path_has_prefix(&rule.path_prefix, path))
            .max_by_key(|rule| rule.path_prefix.len())
    }

    /// Returns the configuration for `path`.
    #[must_use]
    pub fn endpoint_for(&self, path: &str) -> &EndpointConfig {
        self.rule_for(path).map_or(&self.default, |rule| &rule.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let config = InterceptorConfig::new()
            .with_endpoint("/api", EndpointConfig::new(CacheStrategy::NoCache))
            .with_endpoint(
                "/api/posts",
                EndpointConfig::new(CacheStrategy::CacheFirst).with_optimistic(true),
            );

        assert_eq!(
            config.endpoint_for("/api/posts/3").cache_strategy,
            CacheStrategy::CacheFirst
        );
        assert_eq!(
            config.endpoint_for("/api/postscript").cache_strategy,
            CacheStrategy::NoCache
        );
        assert_eq!(
            config.endpoint_for("/other").cache_strategy,
            CacheStrategy::NetworkFirst
        );
    }

    #[test]
    fn loads_from_json() {
        let config: InterceptorConfig = serde_json::from_str(
            r#"{
                "rules": [{
                    "path_prefix": "/posts",
                    "endpoint": {"cache_strategy": "cache_first", "shredding": "json", "resource_type": "post"}
                }],
                "relevant_headers": ["accept-language"]
            }"#,
        )
        .unwrap();
        let posts = config.endpoint_for("/posts");
        assert_eq!(posts.shredding.as_deref(), Some("json"));
        assert!(!posts.optimistic);
        assert_eq!(config.default, EndpointConfig::default());
    }
}
