//! Caching strategies and fetch outcomes.

use chrono::{DateTime, Utc};
use offgrid_protocol::Response;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// How a read is answered. Chosen per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Serve a fresh entry without touching the network. An expired entry
    /// is served stale while a background fetch refreshes it.
    CacheFirst,
    /// Ask the network first; fall back to the cache when it fails.
    #[default]
    NetworkFirst,
    /// Serve any cached entry immediately and always revalidate in the
    /// background.
    StaleWhileRevalidate,
    /// Never serve from the cache and never store.
    NoCache,
}

impl CacheStrategy {
    /// Returns true if responses fetched under this strategy are stored.
    #[must_use]
    pub fn stores(&self) -> bool {
        !matches!(self, CacheStrategy::NoCache)
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheSource {
    /// Fresh from the network.
    Network,
    /// From the cache, not expired.
    CacheFresh,
    /// From the cache, expired; a refresh may be running.
    CacheStale,
    /// From the cache because the network was unavailable.
    Offline,
}

impl CacheSource {
    /// Returns true for any cache-served source.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        !matches!(self, CacheSource::Network)
    }
}

/// Result of [`crate::RequestCache::fetch_with`].
#[derive(Debug)]
pub struct CacheOutcome {
    /// The response to hand to the caller.
    pub response: Response,
    /// Where it came from.
    pub source: CacheSource,
    /// When the served entry was cached, for cache-served responses.
    pub cached_at: Option<DateTime<Utc>>,
    /// Background refresh started for this read, if any.
    pub refresh: Option<JoinHandle<()>>,
}

impl CacheOutcome {
    /// Wraps a response that came straight from the network.
    #[must_use]
    pub fn network(response: Response) -> Self {
        Self {
            response,
            source: CacheSource::Network,
            cached_at: None,
            refresh: None,
        }
    }

    pub(crate) fn cached(response: Response, source: CacheSource, cached_at: DateTime<Utc>) -> Self {
        Self {
            response,
            source,
            cached_at: Some(cached_at),
            refresh: None,
        }
    }

    /// Waits for the background refresh, if one was started.
    pub async fn refreshed(&mut self) {
        if let Some(handle) = self.refresh.take() {
            let _ = handle.await;
        }
    }
}
