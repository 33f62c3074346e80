//! Queue replay and conflict handling.

use crate::config::{FailurePolicy, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::event::{SyncEvent, SyncReport, SyncRunStatus};
use crate::log::{has_unresolved_conflict, SyncLog, SYNC_LOG_STORE};
use offgrid_cache::RequestCache;
use offgrid_protocol::{
    paths_related, url_path, Conflict, ConflictResolution, EntryStatus, FailureKind, Fingerprint,
    Network, NetworkError, Request, Response, SyncLogEntry, ETAG_HEADER, IF_MATCH_HEADER,
};
use offgrid_storage::{KeyValueStore, StoreManager, StoreOptions};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Classified result of one submission.
enum Attempt {
    Accepted,
    /// A server-wins conflict: the local change is dropped.
    Superseded,
    Conflict(Response),
    Rejected(u16),
    Transport(String),
}

/// Whether the run should submit an entry.
enum Decision {
    Replay,
    /// Failed in a way that needs a manual retry.
    Leave,
    /// Retryable, but out of attempts.
    Exhausted,
}

/// Durable, ordered queue of writes made while offline, and the engine
/// that replays them.
///
/// # Replay rules
///
/// Entries are submitted one at a time in sequence order. For each:
///
/// - 2xx: `Submitted`, related cache entries invalidated
/// - a configured conflict status: the endpoint's [`ConflictPolicy`]
///   decides; server-wins drops the local change, client-wins resubmits
///   once with the overwrite header and without `If-Match`, manual leaves
///   the entry `Failed` with the conflict attached
/// - other 4xx: `Failed(Rejected)`, not retried automatically
/// - 5xx or no response: `Failed(Transport)`; later entries are then
///   deferred according to the [`FailurePolicy`]
///
/// Transport failures are replayed automatically on the next run.
///
/// [`ConflictPolicy`]: offgrid_protocol::ConflictPolicy
pub struct SyncManager {
    log: SyncLog,
    network: Arc<dyn Network>,
    cache: Option<RequestCache>,
    config: SyncConfig,
    replay: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("log", &self.log)
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncManager {
    /// Opens the manager over a sync log store.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        network: Arc<dyn Network>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let log = SyncLog::open(store).await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            log,
            network,
            cache: None,
            config,
            replay: Mutex::new(()),
            events,
        })
    }

    /// Opens the manager over the [`SYNC_LOG_STORE`] store of `manager`.
    pub async fn open_in(
        manager: &StoreManager,
        options: &StoreOptions,
        network: Arc<dyn Network>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let store = manager.open_store(SYNC_LOG_STORE, options).await?;
        Self::open(store, network, config).await
    }

    /// Invalidates related entries of `cache` after each successful
    /// submission.
    #[must_use]
    pub fn with_cache(mut self, cache: RequestCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the underlying log.
    #[must_use]
    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    /// Subscribes to queue, status and conflict events.
    #[must_use]
    pub fn on_sync_status_changed(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns true while a replay run (or a log mutation) holds the queue.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.replay.try_lock().is_err()
    }

    /// Queues a write. The entry is persisted before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidOperation`] for read requests.
    pub async fn enqueue(&self, request: &Request) -> SyncResult<SyncLogEntry> {
        let fingerprint = Fingerprint::of(request, &self.config.relevant_headers);
        self.enqueue_with_fingerprint(request, fingerprint).await
    }

    /// Queues a write under a fingerprint computed by the caller.
    pub async fn enqueue_with_fingerprint(
        &self,
        request: &Request,
        fingerprint: Fingerprint,
    ) -> SyncResult<SyncLogEntry> {
        let entry = self.log.append(request, fingerprint).await?;
        info!(
            sequence = entry.sequence,
            operation = ?entry.operation,
            endpoint = %entry.endpoint,
            "queued write"
        );
        self.emit_status(&entry);
        self.emit_queue_changed().await;
        Ok(entry)
    }

    /// Returns every entry ordered by sequence.
    pub async fn get_sync_log(&self) -> SyncResult<Vec<SyncLogEntry>> {
        self.log.entries().await
    }

    /// Returns one entry.
    pub async fn entry(&self, sequence: u64) -> SyncResult<Option<SyncLogEntry>> {
        self.log.get(sequence).await
    }

    /// Returns the number of entries not yet submitted.
    pub async fn pending_count(&self) -> SyncResult<usize> {
        Ok(self
            .log
            .entries()
            .await?
            .iter()
            .filter(|e| e.status != EntryStatus::Submitted)
            .count())
    }

    /// Returns the sequences of unsubmitted entries whose path is related to
    /// the path of `url`. A new write to `url` must not overtake them.
    pub async fn unsubmitted_related(&self, url: &str) -> SyncResult<Vec<u64>> {
        let path = url_path(url);
        Ok(self
            .log
            .entries()
            .await?
            .iter()
            .filter(|e| e.status != EntryStatus::Submitted && paths_related(&e.path(), &path))
            .map(|e| e.sequence)
            .collect())
    }

    /// Replays the queue.
    ///
    /// Returns [`SyncRunStatus::AlreadySyncing`] without doing anything if
    /// another run is in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the log store fails; entries already settled in
    /// this run keep their recorded status.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.sync_until(&CancellationToken::new()).await
    }

    /// Replays the queue, stopping before the next entry once `cancel`
    /// fires. An entry already submitting always runs to completion.
    pub async fn sync_until(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let Ok(_guard) = self.replay.try_lock() else {
            debug!("sync already in flight");
            return Ok(SyncReport::with_status(SyncRunStatus::AlreadySyncing));
        };

        self.log.recover_interrupted().await?;
        let entries: Vec<_> = self
            .log
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.status.is_replayable())
            .collect();
        info!(replayable = entries.len(), "sync started");
        self.emit(SyncEvent::SyncStarted {
            replayable: entries.len(),
        });

        let mut report = SyncReport::default();
        let mut halted: Vec<String> = Vec::new();
        let mut halt_all = false;

        for entry in entries {
            if cancel.is_cancelled() {
                report.status = SyncRunStatus::Cancelled;
                break;
            }
            let path = entry.path();
            if halt_all || halted.iter().any(|p| paths_related(p, &path)) {
                debug!(sequence = entry.sequence, path = %path, "deferred behind failed entry");
                report.deferred.push(entry.sequence);
                continue;
            }

            let failed_path = match self.decide(&entry) {
                Decision::Leave => None,
                Decision::Exhausted => {
                    debug!(sequence = entry.sequence, attempts = entry.attempts, "attempt limit reached");
                    report.deferred.push(entry.sequence);
                    Some(path)
                }
                Decision::Replay => self.replay_entry(entry, &mut report).await?,
            };

            if let Some(path) = failed_path {
                match self.config.failure_policy {
                    FailurePolicy::HaltRelated => halted.push(path),
                    FailurePolicy::HaltAll => halt_all = true,
                    FailurePolicy::Continue => {}
                }
            }
        }

        info!(
            submitted = report.submitted.len(),
            resolved = report.resolved.len(),
            conflicts = report.conflicts.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            "sync finished"
        );
        self.emit(SyncEvent::SyncFinished(report.clone()));
        self.emit_queue_changed().await;
        Ok(report)
    }

    fn decide(&self, entry: &SyncLogEntry) -> Decision {
        if entry.status == EntryStatus::Pending {
            return Decision::Replay;
        }
        match &entry.failure {
            Some(failure) if !failure.is_retryable() => Decision::Leave,
            _ => match self.config.max_attempts {
                Some(max) if entry.attempts >= max => Decision::Exhausted,
                _ => Decision::Replay,
            },
        }
    }

    /// Submits one entry and records the outcome. Returns the entry's path
    /// if it failed in transport.
    async fn replay_entry(
        &self,
        mut entry: SyncLogEntry,
        report: &mut SyncReport,
    ) -> SyncResult<Option<String>> {
        if entry.status == EntryStatus::Failed {
            entry.transition(EntryStatus::Pending)?;
        }
        entry.transition(EntryStatus::Submitting)?;
        self.log.update(&entry).await?;
        self.emit_status(&entry);

        let forced = entry
            .conflict
            .as_ref()
            .is_some_and(|c| c.resolution == Some(ConflictResolution::KeepLocal));
        let request = if forced {
            self.overwrite_request(&entry)
        } else {
            entry.to_request()
        };
        debug!(
            sequence = entry.sequence,
            method = %entry.method,
            endpoint = %entry.endpoint,
            attempt = entry.attempts,
            forced,
            "submitting queued write"
        );

        let mut attempt = self.attempt(&request).await;
        let mut auto_resolved = false;

        let detected = match &attempt {
            Attempt::Conflict(response) => Some(conflict_from(&entry, response)),
            _ => None,
        };
        if let Some(mut conflict) = detected {
            let policy = self.config.policy_for(&entry.path());
            let resolution = if forced {
                None
            } else {
                policy.resolve(&mut conflict)
            };
            warn!(
                sequence = entry.sequence,
                endpoint = %entry.endpoint,
                status = conflict.status,
                ?policy,
                ?resolution,
                "conflict during replay"
            );
            self.emit(SyncEvent::ConflictDetected(conflict.clone()));
            entry.conflict = Some(conflict);

            match resolution {
                Some(ConflictResolution::AcceptRemote) => {
                    attempt = Attempt::Superseded;
                    auto_resolved = true;
                }
                Some(ConflictResolution::KeepLocal) => {
                    attempt = self.attempt(&self.overwrite_request(&entry)).await;
                    auto_resolved = true;
                }
                None => {}
            }
        }

        self.settle(entry, attempt, auto_resolved, report).await
    }

    async fn attempt(&self, request: &Request) -> Attempt {
        match self.network.fetch(request).await {
            Ok(response) if response.is_success() => Attempt::Accepted,
            Ok(response) if self.config.is_conflict(response.status) => Attempt::Conflict(response),
            Ok(response) if response.is_server_error() => {
                Attempt::Transport(format!("server error {}", response.status))
            }
            Ok(response) => Attempt::Rejected(response.status),
            Err(NetworkError::Cancelled) => Attempt::Transport("submission cancelled".into()),
            Err(e) => Attempt::Transport(e.to_string()),
        }
    }

    async fn settle(
        &self,
        mut entry: SyncLogEntry,
        attempt: Attempt,
        auto_resolved: bool,
        report: &mut SyncReport,
    ) -> SyncResult<Option<String>> {
        let sequence = entry.sequence;
        let mut failed_path = None;

        match attempt {
            Attempt::Accepted | Attempt::Superseded => {
                entry.transition(EntryStatus::Submitted)?;
                if auto_resolved {
                    report.resolved.push(sequence);
                } else {
                    report.submitted.push(sequence);
                }
                self.invalidate(&entry).await;
            }
            Attempt::Conflict(response) => {
                entry.fail(
                    FailureKind::Conflict,
                    format!("remote reported a conflict ({})", response.status),
                )?;
                report.conflicts.push(sequence);
            }
            Attempt::Rejected(status) => {
                entry.fail(
                    FailureKind::Rejected { status },
                    format!("remote rejected the write ({status})"),
                )?;
                report.failed.push(sequence);
            }
            Attempt::Transport(message) => {
                warn!(sequence, endpoint = %entry.endpoint, error = %message, "transport failure during replay");
                entry.fail(FailureKind::Transport, message)?;
                report.failed.push(sequence);
                failed_path = Some(entry.path());
            }
        }

        if entry.status == EntryStatus::Submitted && !self.config.retain_submitted {
            self.log.remove(sequence).await?;
        } else {
            self.log.update(&entry).await?;
        }
        self.emit_status(&entry);
        Ok(failed_path)
    }

    fn overwrite_request(&self, entry: &SyncLogEntry) -> Request {
        let mut request = entry.to_request();
        request.remove_header(IF_MATCH_HEADER);
        request.with_header(&self.config.overwrite_header, "true")
    }

    async fn invalidate(&self, entry: &SyncLogEntry) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.invalidate_related(&entry.endpoint).await {
            warn!(endpoint = %entry.endpoint, error = %e, "failed to invalidate cache after write");
        }
    }

    /// Resets every failed entry without an unresolved conflict to
    /// `Pending`. Returns the number reset.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        let _guard = self.replay.lock().await;
        let reset = self.log.reset_failed().await?;
        for entry in &reset {
            self.emit_status(entry);
        }
        if !reset.is_empty() {
            info!(reset = reset.len(), "reset failed entries");
            self.emit_queue_changed().await;
        }
        Ok(reset.len())
    }

    /// Resets one failed entry to `Pending`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::EntryNotFound`] if there is no such entry
    /// - [`SyncError::InvalidTransition`] if it is not `Failed`
    pub async fn retry(&self, sequence: u64) -> SyncResult<SyncLogEntry> {
        let _guard = self.replay.lock().await;
        let mut entry = self.log.require(sequence).await?;
        entry.transition(EntryStatus::Pending)?;
        self.log.update(&entry).await?;
        self.emit_status(&entry);
        Ok(entry)
    }

    /// Settles a conflict left for manual resolution.
    ///
    /// `KeepLocal` resets the entry to `Pending`; its next replay
    /// overwrites the remote. `AcceptRemote` drops the entry from the log
    /// and invalidates related cache entries.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidOperation`] if the entry has no
    /// unresolved conflict.
    pub async fn resolve_conflict(
        &self,
        sequence: u64,
        resolution: ConflictResolution,
    ) -> SyncResult<SyncLogEntry> {
        let _guard = self.replay.lock().await;
        let mut entry = self.log.require(sequence).await?;
        if !has_unresolved_conflict(&entry) {
            return Err(SyncError::InvalidOperation(format!(
                "entry {sequence} has no unresolved conflict"
            )));
        }
        if let Some(conflict) = entry.conflict.as_mut() {
            conflict.resolve(resolution);
        }

        match resolution {
            ConflictResolution::KeepLocal => {
                entry.transition(EntryStatus::Pending)?;
                self.log.update(&entry).await?;
                self.emit_status(&entry);
            }
            ConflictResolution::AcceptRemote => {
                self.log.remove(sequence).await?;
                self.invalidate(&entry).await;
                self.emit_queue_changed().await;
            }
        }
        info!(sequence, ?resolution, "resolved conflict");
        Ok(entry)
    }

    /// Removes an entry from the log. Returns whether it existed.
    pub async fn remove(&self, sequence: u64) -> SyncResult<bool> {
        let _guard = self.replay.lock().await;
        let removed = self.log.remove(sequence).await?;
        if removed {
            self.emit_queue_changed().await;
        }
        Ok(removed)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_status(&self, entry: &SyncLogEntry) {
        self.emit(SyncEvent::EntryStatusChanged {
            sequence: entry.sequence,
            status: entry.status,
            failure: entry.failure.clone(),
        });
    }

    async fn emit_queue_changed(&self) {
        if self.events.receiver_count() == 0 {
            return;
        }
        match self.pending_count().await {
            Ok(pending) => self.emit(SyncEvent::QueueChanged { pending }),
            Err(e) => warn!(error = %e, "failed to count pending entries"),
        }
    }
}

fn conflict_from(entry: &SyncLogEntry, response: &Response) -> Conflict {
    Conflict {
        sequence: entry.sequence,
        fingerprint: entry.fingerprint.clone(),
        endpoint: entry.endpoint.clone(),
        status: response.status,
        local: entry.payload.clone(),
        remote: (!response.body.is_empty()).then(|| response.body.clone()),
        remote_etag: response.header(ETAG_HEADER).map(str::to_string),
        resolution: None,
    }
}
