//! Cache entries and cache targets.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use offgrid_protocol::{Fingerprint, Headers};
use offgrid_shred::{QueryDescriptor, RequestDescriptor};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy name recorded for entries cached as raw bodies.
pub const RAW_STRATEGY: &str = "raw";

/// How a cached body is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedContent {
    /// The body as received.
    Raw {
        /// Response body.
        body: Bytes,
    },
    /// The body was shredded into resource records; the descriptor
    /// reassembles it.
    Shredded {
        /// Reassembly descriptor.
        descriptor: QueryDescriptor,
    },
}

/// A cached response for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request fingerprint (also the storage key).
    pub fingerprint: Fingerprint,
    /// URL of the cached request.
    pub url: String,
    /// Shredding strategy, or [`RAW_STRATEGY`].
    pub strategy: String,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// When the entry stops being served as fresh.
    pub expires_at: Option<DateTime<Utc>>,
    /// Response status.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: Headers,
    /// Response body.
    pub content: CachedContent,
}

impl CacheEntry {
    /// Returns true once `now` has reached `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Returns true if the entry has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns true if the body is held as resource records.
    #[must_use]
    pub fn is_shredded(&self) -> bool {
        matches!(self.content, CachedContent::Shredded { .. })
    }
}

/// What to cache a response under, and how.
///
/// # Example
///
/// ```rust
/// use offgrid_cache::CacheTarget;
/// use offgrid_protocol::{Fingerprint, Request};
/// use std::time::Duration;
///
/// let request = Request::get("/users/42");
/// let target = CacheTarget::new(Fingerprint::of(&request, &[]), &request.url)
///     .shredded("json", "user")
///     .with_id("42")
///     .with_ttl(Duration::from_secs(30));
/// assert_eq!(target.shredding.as_deref(), Some("json"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTarget {
    /// Fingerprint of the request.
    pub fingerprint: Fingerprint,
    /// Request shape handed to the shredding strategy.
    pub descriptor: RequestDescriptor,
    /// Shredding strategy; `None` caches raw bodies.
    pub shredding: Option<String>,
    /// TTL overriding the cache default.
    pub ttl: Option<Duration>,
}

impl CacheTarget {
    /// Creates a raw-caching target.
    pub fn new(fingerprint: Fingerprint, url: impl Into<String>) -> Self {
        Self {
            fingerprint,
            descriptor: RequestDescriptor::new(url, ""),
            shredding: None,
            ttl: None,
        }
    }

    /// Shreds responses with `strategy` into records of `resource_type`.
    #[must_use]
    pub fn shredded(mut self, strategy: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.shredding = Some(strategy.into());
        self.descriptor.resource_type = resource_type.into();
        self
    }

    /// Names the single resource the request addresses.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_id(id);
        self
    }

    /// Limits the request to a subset of fields.
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor = self.descriptor.with_fields(fields);
        self
    }

    /// Sets the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets an optional TTL.
    #[must_use]
    pub fn with_optional_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.descriptor.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry(expires_at: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry {
            fingerprint: Fingerprint::from_hex("ab"),
            url: "/a".into(),
            strategy: RAW_STRATEGY.into(),
            stored_at: Utc::now(),
            expires_at,
            status: 200,
            headers: Headers::new(),
            content: CachedContent::Raw { body: Bytes::from_static(b"x") },
        }
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        assert!(!entry(None).is_expired_at(now));
        assert!(entry(Some(now)).is_expired_at(now));
        assert!(!entry(Some(now + ChronoDuration::seconds(1))).is_expired_at(now));
    }

    #[test]
    fn entry_survives_json() {
        let original = entry(None);
        let value = serde_json::to_value(&original).unwrap();
        assert_eq!(value["content"]["kind"], "raw");
        let back: CacheEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, original);
    }
}
