//! The request cache.

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheTarget, CachedContent, RAW_STRATEGY};
use crate::error::{CacheError, CacheResult};
use crate::strategy::{CacheOutcome, CacheSource, CacheStrategy};
use bytes::Bytes;
use chrono::Utc;
use offgrid_protocol::{
    paths_related, url_path, Fingerprint, NetworkError, Response, CONTENT_TYPE_HEADER,
};
use offgrid_shred::{Layout, ResourceRef, ShredError, ShreddingPipeline};
use offgrid_storage::{KeyValueStore, Metadata, StoreManager, StoreOptions, StoreValue};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Store name used by [`RequestCache::open`] for cache entries.
pub const CACHE_STORE: &str = "offgrid.cache";

/// Store name used by [`RequestCache::open`] for shredded resource records.
pub const RESOURCE_STORE: &str = "offgrid.resources";

/// Maps request fingerprints to cached responses.
///
/// Entries live in one store keyed by fingerprint; shredded bodies live as
/// resource records in a second store shared by every entry, so a
/// collection response can later answer a single-resource read.
///
/// Cloning is cheap and clones share state.
///
/// # Invariants
///
/// - Expired entries are never returned by [`lookup`](Self::lookup); they
///   are only deleted by [`evict_expired`](Self::evict_expired) or by being
///   overwritten
/// - Writes to one fingerprint replace the whole entry in a single backend
///   upsert
/// - At most one background refresh runs per fingerprint
#[derive(Clone)]
pub struct RequestCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: Arc<dyn KeyValueStore>,
    resources: Arc<dyn KeyValueStore>,
    pipeline: ShreddingPipeline,
    config: CacheConfig,
    refreshing: Mutex<HashSet<Fingerprint>>,
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("entries", self.inner.entries.keyspace())
            .field("resources", self.inner.resources.keyspace())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl RequestCache {
    /// Creates a cache with the default pipeline and configuration.
    pub fn new(entries: Arc<dyn KeyValueStore>, resources: Arc<dyn KeyValueStore>) -> Self {
        Self::with_parts(entries, resources, ShreddingPipeline::new(), CacheConfig::default())
    }

    /// Creates a cache from its parts.
    pub fn with_parts(
        entries: Arc<dyn KeyValueStore>,
        resources: Arc<dyn KeyValueStore>,
        pipeline: ShreddingPipeline,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries,
                resources,
                pipeline,
                config,
                refreshing: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Opens [`CACHE_STORE`] and [`RESOURCE_STORE`] through `manager`.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be opened.
    pub async fn open(
        manager: &StoreManager,
        options: &StoreOptions,
        pipeline: ShreddingPipeline,
        config: CacheConfig,
    ) -> CacheResult<Self> {
        let entries = manager.open_store(CACHE_STORE, options).await?;
        let resources = manager.open_store(RESOURCE_STORE, options).await?;
        Ok(Self::with_parts(entries, resources, pipeline, config))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the shredding pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &ShreddingPipeline {
        &self.inner.pipeline
    }

    /// Returns the store holding resource records.
    #[must_use]
    pub fn resources(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.resources
    }

    /// Returns the entry for `fingerprint` unless it is missing or expired.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        match self.read_entry(fingerprint).await? {
            Some(entry) if entry.is_expired() => {
                debug!(fingerprint = %fingerprint.short(), "cache entry expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Returns the entry for `fingerprint` even if it has expired.
    pub async fn lookup_stale(&self, fingerprint: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        self.read_entry(fingerprint).await
    }

    async fn read_entry(&self, fingerprint: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        let Some(record) = self.inner.entries.get_item(fingerprint.as_str()).await? else {
            return Ok(None);
        };
        match record.value {
            StoreValue::Json(value) => Ok(Some(serde_json::from_value(value)?)),
            StoreValue::Bytes(_) => Err(CacheError::Serialization(format!(
                "cache entry {} holds bytes",
                fingerprint.short()
            ))),
        }
    }

    /// Caches `response` for `target`, replacing any previous entry.
    ///
    /// Bodies are shredded when the target names a strategy. A body the
    /// strategy rejects is cached raw instead.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] if a backend write fails. On
    /// [`offgrid_storage::StoreError::QuotaExceeded`] expired entries are
    /// evicted and the write is retried once.
    pub async fn store(&self, target: &CacheTarget, response: &Response) -> CacheResult<CacheEntry> {
        let (strategy, content) = match &target.shredding {
            Some(strategy) => match self
                .inner
                .pipeline
                .shred_into(
                    strategy,
                    &response.body,
                    &target.descriptor,
                    self.inner.resources.as_ref(),
                )
                .await
            {
                Ok(descriptor) => (strategy.clone(), CachedContent::Shredded { descriptor }),
                Err(ShredError::Store(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        url = %target.url(),
                        strategy = %strategy,
                        error = %e,
                        "shredding failed, caching raw body"
                    );
                    (RAW_STRATEGY.to_string(), raw(&response.body))
                }
            },
            None => (RAW_STRATEGY.to_string(), raw(&response.body)),
        };

        let stored_at = Utc::now();
        let expires_at = target
            .ttl
            .or(self.inner.config.default_ttl)
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| stored_at.checked_add_signed(ttl));

        let entry = CacheEntry {
            fingerprint: target.fingerprint.clone(),
            url: target.url().to_string(),
            strategy,
            stored_at,
            expires_at,
            status: response.status,
            headers: response.headers.clone(),
            content,
        };
        self.write_entry(&entry).await?;
        debug!(
            fingerprint = %entry.fingerprint.short(),
            url = %entry.url,
            strategy = %entry.strategy,
            "cached response"
        );
        Ok(entry)
    }

    async fn write_entry(&self, entry: &CacheEntry) -> CacheResult<()> {
        let mut metadata = Metadata::new();
        metadata.insert("url".into(), json!(entry.url));
        metadata.insert("path".into(), json!(url_path(&entry.url)));
        metadata.insert("strategy".into(), json!(entry.strategy));
        metadata.insert("stored_at".into(), json!(entry.stored_at.to_rfc3339()));
        let value = serde_json::to_value(entry)?;
        let key = entry.fingerprint.as_str();

        match self
            .inner
            .entries
            .upsert(key, metadata.clone(), StoreValue::Json(value.clone()))
            .await
        {
            Err(e) if e.is_quota() => {
                let evicted = self.evict_expired().await?;
                warn!(evicted, "cache quota exceeded, evicted expired entries");
                self.inner
                    .entries
                    .upsert(key, metadata, StoreValue::Json(value))
                    .await?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Rebuilds the response an entry holds.
    ///
    /// Returns `None` if a shredded entry's records are no longer stored.
    pub async fn materialize(&self, entry: &CacheEntry) -> CacheResult<Option<Response>> {
        let body = match &entry.content {
            CachedContent::Raw { body } => body.clone(),
            CachedContent::Shredded { descriptor } => {
                match self
                    .inner
                    .pipeline
                    .unshred(&entry.strategy, descriptor, self.inner.resources.as_ref())
                    .await?
                {
                    Some(body) => Bytes::from(body),
                    None => return Ok(None),
                }
            }
        };
        let mut response = Response::new(entry.status).with_body(body);
        response.headers = entry.headers.clone();
        Ok(Some(response))
    }

    /// Answers a single-resource read from resource records, which may have
    /// been cached by a different URL.
    pub async fn query_resource(&self, target: &CacheTarget) -> CacheResult<Option<Response>> {
        let Some(strategy) = &target.shredding else {
            return Ok(None);
        };
        let body = self
            .inner
            .pipeline
            .query(strategy, &target.descriptor, self.inner.resources.as_ref())
            .await?;
        Ok(body.map(|body| {
            Response::new(200)
                .with_header(CONTENT_TYPE_HEADER, "application/json")
                .with_body(body)
        }))
    }

    /// Removes the entry for `fingerprint`. Returns whether one existed.
    pub async fn remove(&self, fingerprint: &Fingerprint) -> CacheResult<bool> {
        Ok(self.inner.entries.remove_by_key(fingerprint.as_str()).await?)
    }

    /// Returns every entry, expired ones included.
    pub async fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key in self.inner.entries.keys().await? {
            if let Some(entry) = self.read_entry(&Fingerprint::from_hex(key)).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Removes every entry matching `predicate`. Entries that no longer
    /// decode are removed as well. Returns the number removed.
    pub async fn invalidate<P>(&self, predicate: P) -> CacheResult<usize>
    where
        P: Fn(&CacheEntry) -> bool + Send + Sync,
    {
        Ok(self.remove_matching(predicate).await?.0)
    }

    /// Removes matching entries. Returns the number removed and the
    /// decodable entries among them.
    async fn remove_matching<P>(&self, predicate: P) -> CacheResult<(usize, Vec<CacheEntry>)>
    where
        P: Fn(&CacheEntry) -> bool + Send + Sync,
    {
        let mut removed = 0;
        let mut entries = Vec::new();
        for key in self.inner.entries.keys().await? {
            let fingerprint = Fingerprint::from_hex(key);
            let matched = match self.read_entry(&fingerprint).await {
                Ok(Some(entry)) if predicate(&entry) => Some(Some(entry)),
                Ok(_) => None,
                Err(CacheError::Serialization(e)) => {
                    warn!(fingerprint = %fingerprint.short(), error = %e, "dropping undecodable cache entry");
                    Some(None)
                }
                Err(e) => return Err(e),
            };
            let Some(entry) = matched else {
                continue;
            };
            if self.remove(&fingerprint).await? {
                removed += 1;
                entries.extend(entry);
            }
        }
        Ok((removed, entries))
    }

    /// Removes entries whose path equals, contains or is contained by the
    /// path of `url`, together with the top-level resource records and
    /// blobs those entries were reassembled from.
    ///
    /// Records shared with entries that are kept go as well; those entries
    /// then no longer materialize and are answered from the network again.
    pub async fn invalidate_related(&self, url: &str) -> CacheResult<usize> {
        let path = url_path(url);
        let (removed, entries) = self
            .remove_matching(|entry| paths_related(&url_path(&entry.url), &path))
            .await?;

        let mut keys = BTreeSet::new();
        for entry in &entries {
            let CachedContent::Shredded { descriptor } = &entry.content else {
                continue;
            };
            match &descriptor.layout {
                Layout::Blob { key } => {
                    keys.insert(key.clone());
                }
                layout => keys.extend(layout.resources().into_iter().map(ResourceRef::key)),
            }
        }
        for key in &keys {
            self.inner.resources.remove_by_key(key).await?;
        }
        if removed > 0 {
            debug!(path = %path, removed, records = keys.len(), "invalidated related cache entries");
        }
        Ok(removed)
    }

    /// Invalidates what a successful write to `target` may have changed:
    /// the entries related to its URL and, for a target naming a single
    /// shredded resource, that resource's record.
    pub async fn invalidate_target(&self, target: &CacheTarget) -> CacheResult<usize> {
        let removed = self.invalidate_related(target.url()).await?;
        if let (Some(_), Some(id)) = (&target.shredding, &target.descriptor.id) {
            let reference = ResourceRef::new(target.descriptor.resource_type.clone(), id.clone());
            if self.inner.resources.remove_by_key(&reference.key()).await? {
                debug!(record = %reference.key(), "dropped resource record after write");
            }
        }
        Ok(removed)
    }

    /// Deletes expired entries. Returns the number removed.
    pub async fn evict_expired(&self) -> CacheResult<usize> {
        let now = Utc::now();
        self.invalidate(|entry| entry.is_expired_at(now)).await
    }

    /// Answers `target` from the cache alone, as when the network is
    /// unavailable.
    ///
    /// Tries the entry for the fingerprint (expired entries only if
    /// `serve_stale_on_error` is set), then resource records.
    pub async fn serve_offline(&self, target: &CacheTarget) -> CacheResult<Option<CacheOutcome>> {
        if let Some(entry) = self.lookup_stale(&target.fingerprint).await? {
            if !entry.is_expired() || self.inner.config.serve_stale_on_error {
                if let Some(response) = self.materialize(&entry).await? {
                    return Ok(Some(CacheOutcome::cached(
                        response,
                        CacheSource::Offline,
                        entry.stored_at,
                    )));
                }
            }
        }
        Ok(self.query_resource(target).await?.map(|response| CacheOutcome {
            response,
            source: CacheSource::Offline,
            cached_at: None,
            refresh: None,
        }))
    }

    /// Answers a read under `strategy`, calling `fetcher` when the network
    /// is needed.
    ///
    /// Successful (2xx) network responses are stored unless the strategy is
    /// [`CacheStrategy::NoCache`]. Background refreshes are spawned on the
    /// current tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Cancelled`] if the fetcher reports cancellation; the
    ///   cache is never consulted as a fallback in that case
    /// - [`CacheError::NetworkUnavailable`] if the fetcher fails and nothing
    ///   cached can answer
    pub async fn fetch_with<F, Fut>(
        &self,
        strategy: CacheStrategy,
        target: &CacheTarget,
        fetcher: F,
    ) -> CacheResult<CacheOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Response, NetworkError>> + Send + 'static,
    {
        match strategy {
            CacheStrategy::NoCache | CacheStrategy::NetworkFirst => {
                self.fetch_network(strategy, target, fetcher).await
            }
            CacheStrategy::CacheFirst | CacheStrategy::StaleWhileRevalidate => {
                let Some((entry, response)) = self.cached(&target.fingerprint).await? else {
                    return self.fetch_network(strategy, target, fetcher).await;
                };
                let expired = entry.is_expired();
                let source = if expired {
                    CacheSource::CacheStale
                } else {
                    CacheSource::CacheFresh
                };
                let mut outcome = CacheOutcome::cached(response, source, entry.stored_at);
                if expired || strategy == CacheStrategy::StaleWhileRevalidate {
                    outcome.refresh = self.spawn_refresh(target.clone(), fetcher);
                }
                Ok(outcome)
            }
        }
    }

    async fn cached(&self, fingerprint: &Fingerprint) -> CacheResult<Option<(CacheEntry, Response)>> {
        let Some(entry) = self.lookup_stale(fingerprint).await? else {
            return Ok(None);
        };
        Ok(self
            .materialize(&entry)
            .await?
            .map(|response| (entry, response)))
    }

    async fn fetch_network<F, Fut>(
        &self,
        strategy: CacheStrategy,
        target: &CacheTarget,
        fetcher: F,
    ) -> CacheResult<CacheOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response, NetworkError>>,
    {
        match fetcher().await {
            Ok(response) => {
                if strategy.stores() && response.is_success() {
                    self.store(target, &response).await?;
                }
                Ok(CacheOutcome::network(response))
            }
            Err(NetworkError::Cancelled) => Err(CacheError::Cancelled),
            Err(e) => {
                if strategy.stores() {
                    if let Some(outcome) = self.serve_offline(target).await? {
                        warn!(url = %target.url(), error = %e, "network failed, serving cached response");
                        return Ok(outcome);
                    }
                }
                Err(CacheError::NetworkUnavailable(e.to_string()))
            }
        }
    }

    fn spawn_refresh<F, Fut>(&self, target: CacheTarget, fetcher: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Response, NetworkError>> + Send + 'static,
    {
        if !self.inner.refreshing.lock().insert(target.fingerprint.clone()) {
            debug!(fingerprint = %target.fingerprint.short(), "refresh already running");
            return None;
        }
        let cache = self.clone();
        Some(tokio::spawn(async move {
            match fetcher().await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = cache.store(&target, &response).await {
                        warn!(url = %target.url(), error = %e, "failed to store refreshed response");
                    }
                }
                Ok(response) => {
                    debug!(url = %target.url(), status = response.status, "refresh not cached");
                }
                Err(e) => {
                    debug!(url = %target.url(), error = %e, "background refresh failed");
                }
            }
            cache.inner.refreshing.lock().remove(&target.fingerprint);
        }))
    }
}

fn raw(body: &Bytes) -> CachedContent {
    CachedContent::Raw { body: body.clone() }
}
