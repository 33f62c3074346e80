//! Request routing between network, cache and sync queue.

use crate::config::{EndpointConfig, InterceptorConfig};
use crate::connectivity::Connectivity;
use crate::error::{FetchError, FetchResult};
use offgrid_cache::{CacheOutcome, CacheSource, CacheTarget, RequestCache};
use offgrid_protocol::{
    parse_url, path_has_prefix, Fingerprint, Network, NetworkError, Request, Response,
    SyncLogEntry, CONTENT_TYPE_HEADER, QUEUED_HEADER,
};
use offgrid_sync::SyncManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status of a synthesized response for a queued write.
pub const QUEUED_STATUS: u16 = 202;

/// What [`FetchInterceptor::intercept`] did with a request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Answered by the network or the cache.
    Completed(CacheOutcome),
    /// The write was queued and answered with a synthesized response.
    Optimistic {
        /// The synthesized response, tagged with [`QUEUED_HEADER`].
        response: Response,
        /// The queued entry.
        entry: SyncLogEntry,
    },
    /// The write was queued without a response.
    Queued(SyncLogEntry),
}

impl FetchOutcome {
    /// Returns the response, if one was produced.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Completed(outcome) => Some(&outcome.response),
            FetchOutcome::Optimistic { response, .. } => Some(response),
            FetchOutcome::Queued(_) => None,
        }
    }

    /// Returns the queued entry for writes handed to the sync queue.
    #[must_use]
    pub fn queued(&self) -> Option<&SyncLogEntry> {
        match self {
            FetchOutcome::Completed(_) => None,
            FetchOutcome::Optimistic { entry, .. } | FetchOutcome::Queued(entry) => Some(entry),
        }
    }

    /// Returns where a completed response came from.
    #[must_use]
    pub fn source(&self) -> Option<CacheSource> {
        match self {
            FetchOutcome::Completed(outcome) => Some(outcome.source),
            _ => None,
        }
    }

    /// Converts the outcome into a response. A queued write without an
    /// optimistic response becomes an empty `202` tagged with its sequence.
    #[must_use]
    pub fn into_response(self) -> Response {
        match self {
            FetchOutcome::Completed(outcome) => outcome.response,
            FetchOutcome::Optimistic { response, .. } => response,
            FetchOutcome::Queued(entry) => queued_response(&entry, None),
        }
    }
}

/// The single chokepoint for application requests.
///
/// Reads go through the [`RequestCache`] under the endpoint's strategy.
/// Writes go to the network when online; when offline, when the network
/// fails, or when the queue still holds unsubmitted writes to a related
/// path, they are handed to the [`SyncManager`]. The interceptor routes;
/// it never resolves conflicts.
pub struct FetchInterceptor {
    network: Arc<dyn Network>,
    cache: RequestCache,
    sync: Option<Arc<SyncManager>>,
    config: InterceptorConfig,
    connectivity: Connectivity,
}

impl std::fmt::Debug for FetchInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchInterceptor")
            .field("config", &self.config)
            .field("connectivity", &self.connectivity)
            .field("sync", &self.sync.is_some())
            .finish_non_exhaustive()
    }
}

impl FetchInterceptor {
    /// Creates an interceptor with default configuration and no sync
    /// queue.
    pub fn new(network: Arc<dyn Network>, cache: RequestCache) -> Self {
        Self {
            network,
            cache,
            sync: None,
            config: InterceptorConfig::default(),
            connectivity: Connectivity::default(),
        }
    }

    /// Queues writes that cannot reach the network on `sync`.
    #[must_use]
    pub fn with_sync(mut self, sync: Arc<SyncManager>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Sets the routing configuration.
    #[must_use]
    pub fn with_config(mut self, config: InterceptorConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing connectivity flag.
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Returns the connectivity flag.
    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Returns the routing configuration.
    #[must_use]
    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Returns the cache.
    #[must_use]
    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Returns the sync queue, if attached.
    #[must_use]
    pub fn sync(&self) -> Option<&Arc<SyncManager>> {
        self.sync.as_ref()
    }

    /// Routes one request.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NetworkUnavailable`] for reads the network and the
    ///   cache both cannot answer, and for writes while offline without a
    ///   sync queue
    /// - [`FetchError::Network`] for writes that failed in transport without
    ///   a sync queue
    /// - [`FetchError::Cache`] or [`FetchError::Sync`] if local storage fails
    pub async fn intercept(&self, request: Request) -> FetchResult<FetchOutcome> {
        self.intercept_until(request, &CancellationToken::new()).await
    }

    /// Routes one request, giving up with [`FetchError::Cancelled`] once
    /// `cancel` fires.
    ///
    /// A cancelled read returns without consulting or writing the cache. A
    /// write is only cancellable before it reaches the network.
    pub async fn intercept_until(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> FetchResult<FetchOutcome> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let path = request.path();
        let fingerprint = Fingerprint::of(&request, &self.config.relevant_headers);
        debug!(method = %request.method, path = %path, fingerprint = %fingerprint.short(), "intercepted");

        if request.method.is_mutating() {
            let endpoint = self.config.endpoint_for(&path);
            self.write(request, fingerprint, endpoint).await
        } else {
            let target = self.target(&request, &path, fingerprint);
            self.read(request, target, cancel).await
        }
    }

    fn target(&self, request: &Request, path: &str, fingerprint: Fingerprint) -> CacheTarget {
        let endpoint = self.config.endpoint_for(path);
        let mut target =
            CacheTarget::new(fingerprint, request.url.clone()).with_optional_ttl(endpoint.ttl);
        let (Some(strategy), Some(resource_type)) = (&endpoint.shredding, &endpoint.resource_type)
        else {
            return target;
        };
        target = target.shredded(strategy.clone(), resource_type.clone());

        // One segment below the rule prefix addresses a single resource.
        if let Some(rule) = self.config.rule_for(path).filter(|r| r.path_prefix != "/") {
            if path != rule.path_prefix && path_has_prefix(&rule.path_prefix, path) {
                let rest = path[rule.path_prefix.len()..].trim_matches('/');
                if !rest.is_empty() && !rest.contains('/') {
                    target = target.with_id(rest);
                }
            }
        }
        if let Some(fields) = requested_fields(&request.url) {
            target = target.with_fields(fields);
        }
        target
    }

    async fn read(
        &self,
        request: Request,
        target: CacheTarget,
        cancel: &CancellationToken,
    ) -> FetchResult<FetchOutcome> {
        let strategy = self.config.endpoint_for(&request.path()).cache_strategy;

        if !self.connectivity.is_online() {
            if !strategy.stores() {
                return Err(FetchError::NetworkUnavailable("offline".into()));
            }
            let served = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                served = self.cache.serve_offline(&target) => served?,
            };
            return match served {
                Some(outcome) => {
                    debug!(url = %request.url, "offline read served from cache");
                    Ok(FetchOutcome::Completed(outcome))
                }
                None => Err(FetchError::NetworkUnavailable(format!(
                    "offline and {} is not cached",
                    request.url
                ))),
            };
        }

        let network = Arc::clone(&self.network);
        let fetcher = move || async move { network.fetch(&request).await };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            outcome = self.cache.fetch_with(strategy, &target, fetcher) => {
                Ok(FetchOutcome::Completed(outcome?))
            }
        }
    }

    async fn write(
        &self,
        request: Request,
        fingerprint: Fingerprint,
        endpoint: &EndpointConfig,
    ) -> FetchResult<FetchOutcome> {
        let failure = if !self.connectivity.is_online() {
            FetchError::NetworkUnavailable("offline".into())
        } else if let Some(ahead) = self.queued_ahead(&request.url).await? {
            info!(url = %request.url, ahead = ?ahead, "write queued behind unsubmitted writes to related paths");
            FetchError::NetworkUnavailable(format!("queued behind entries {ahead:?}"))
        } else {
            match self.network.fetch(&request).await {
                Ok(response) => {
                    if response.is_success() {
                        let target = self.target(&request, &request.path(), fingerprint.clone());
                        if let Err(e) = self.cache.invalidate_target(&target).await {
                            warn!(url = %request.url, error = %e, "failed to invalidate cache after write");
                        }
                    }
                    return Ok(FetchOutcome::Completed(CacheOutcome::network(response)));
                }
                Err(NetworkError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    warn!(url = %request.url, error = %e, "write failed in transport");
                    FetchError::Network(e)
                }
            }
        };

        let Some(sync) = &self.sync else {
            return Err(failure);
        };
        let entry = sync.enqueue_with_fingerprint(&request, fingerprint).await?;
        info!(sequence = entry.sequence, url = %request.url, "write queued for sync");

        if endpoint.optimistic {
            let response = queued_response(&entry, Some(&request));
            Ok(FetchOutcome::Optimistic { response, entry })
        } else {
            Ok(FetchOutcome::Queued(entry))
        }
    }

    /// Returns the sequences of queued writes a write to `url` must not
    /// overtake, or `None` if it may go straight to the network.
    async fn queued_ahead(&self, url: &str) -> FetchResult<Option<Vec<u64>>> {
        let Some(sync) = &self.sync else {
            return Ok(None);
        };
        let ahead = sync.unsubmitted_related(url).await?;
        Ok((!ahead.is_empty()).then_some(ahead))
    }
}

/// Builds the response for a queued write, echoing the request body when
/// given.
fn queued_response(entry: &SyncLogEntry, request: Option<&Request>) -> Response {
    let mut response =
        Response::new(QUEUED_STATUS).with_header(QUEUED_HEADER, entry.sequence.to_string());
    if let Some(body) = request.and_then(|r| r.body.clone()) {
        response = response.with_body(body);
        if let Some(content_type) = request.and_then(|r| r.header(CONTENT_TYPE_HEADER)) {
            response = response.with_header(CONTENT_TYPE_HEADER, content_type);
        }
    }
    response
}

/// Returns the `fields` query parameter split on commas.
fn requested_fields(url: &str) -> Option<Vec<String>> {
    let (url, _) = parse_url(url).ok()?;
    let (_, fields) = url.query_pairs().find(|(name, _)| name == "fields")?;
    let fields: Vec<String> = fields
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    (!fields.is_empty()).then_some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_parameter() {
        assert_eq!(
            requested_fields("/posts/1?fields=title, body&x=1"),
            Some(vec!["title".to_string(), "body".to_string()])
        );
        assert_eq!(requested_fields("/posts/1?fields="), None);
        assert_eq!(requested_fields("/posts/1"), None);
    }
}
