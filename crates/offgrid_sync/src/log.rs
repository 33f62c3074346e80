//! The durable sync log.

use crate::error::{SyncError, SyncResult};
use offgrid_protocol::{EntryStatus, FailureKind, Fingerprint, Request, SyncLogEntry};
use offgrid_storage::{KeyValueStore, Metadata, StoreValue};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Store name used for the sync log when opened through a store manager.
pub const SYNC_LOG_STORE: &str = "offgrid.sync_log";

const ENTRY_PREFIX: &str = "entry/";
const NEXT_SEQUENCE_KEY: &str = "meta/next_sequence";

/// Returns the store key of an entry. Sequences are zero-padded so keys
/// sort in sequence order.
#[must_use]
pub fn entry_key(sequence: u64) -> String {
    format!("{ENTRY_PREFIX}{sequence:020}")
}

/// An append-only, sequence-ordered log of queued writes, persisted in a
/// [`KeyValueStore`].
///
/// # Invariants
///
/// - Sequences are strictly increasing and never reused, also across
///   restarts and after entries are removed
/// - An entry is persisted before [`append`](Self::append) returns
/// - No entry is left `Submitting` after [`open`](Self::open)
pub struct SyncLog {
    store: Arc<dyn KeyValueStore>,
    next_sequence: Mutex<u64>,
}

impl std::fmt::Debug for SyncLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLog")
            .field("store", self.store.keyspace())
            .finish_non_exhaustive()
    }
}

impl SyncLog {
    /// Opens the log held by `store`.
    ///
    /// Entries left `Submitting` by a previous process are marked
    /// `Failed` as interrupted, since their outcome is unknown.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> SyncResult<Self> {
        let log = Self {
            store,
            next_sequence: Mutex::new(1),
        };
        let entries = log.entries().await?;

        let stored_next = match log.store.get_item(NEXT_SEQUENCE_KEY).await? {
            Some(record) => record
                .value
                .as_json()
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| SyncError::Serialization("invalid next sequence".into()))?,
            None => 1,
        };
        let after_last = entries.last().map_or(1, |e| e.sequence + 1);
        *log.next_sequence.lock().await = stored_next.max(after_last);

        let recovered = log.recover_interrupted().await?;
        info!(
            entries = entries.len(),
            recovered,
            "opened sync log"
        );
        Ok(log)
    }

    /// Marks every `Submitting` entry `Failed` as interrupted. Returns the
    /// number of entries changed.
    pub async fn recover_interrupted(&self) -> SyncResult<usize> {
        let mut recovered = 0;
        for mut entry in self.entries().await? {
            if entry.status == EntryStatus::Submitting {
                entry.fail(
                    FailureKind::Interrupted,
                    "submission interrupted before its outcome was recorded",
                )?;
                self.update(&entry).await?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Appends a write as a new `Pending` entry.
    ///
    /// The sequence is claimed durably before the entry is written, so a
    /// failed append leaves a gap instead of a sequence a later append
    /// could reuse.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidOperation`] for read requests, or a
    /// store error if the entry could not be persisted.
    pub async fn append(&self, request: &Request, fingerprint: Fingerprint) -> SyncResult<SyncLogEntry> {
        let mut next = self.next_sequence.lock().await;
        let entry = SyncLogEntry::from_request(*next, request, fingerprint)?;
        self.store
            .upsert(NEXT_SEQUENCE_KEY, Metadata::new(), json!(entry.sequence + 1).into())
            .await?;
        *next = entry.sequence + 1;
        self.update(&entry).await?;
        debug!(sequence = entry.sequence, endpoint = %entry.endpoint, "appended sync log entry");
        Ok(entry)
    }

    /// Writes an entry, replacing the stored copy.
    pub async fn update(&self, entry: &SyncLogEntry) -> SyncResult<()> {
        let mut metadata = Metadata::new();
        metadata.insert("sequence".into(), json!(entry.sequence));
        metadata.insert("status".into(), json!(entry.status));
        metadata.insert("path".into(), json!(entry.path()));
        metadata.insert("operation".into(), json!(entry.operation));
        self.store
            .upsert(
                &entry_key(entry.sequence),
                metadata,
                StoreValue::Json(serde_json::to_value(entry)?),
            )
            .await?;
        Ok(())
    }

    /// Reads one entry.
    pub async fn get(&self, sequence: u64) -> SyncResult<Option<SyncLogEntry>> {
        match self.store.get_item(&entry_key(sequence)).await? {
            Some(record) => decode(record.value).map(Some),
            None => Ok(None),
        }
    }

    /// Reads one entry that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EntryNotFound`] if it does not.
    pub async fn require(&self, sequence: u64) -> SyncResult<SyncLogEntry> {
        self.get(sequence)
            .await?
            .ok_or(SyncError::EntryNotFound(sequence))
    }

    /// Returns every entry ordered by sequence.
    pub async fn entries(&self) -> SyncResult<Vec<SyncLogEntry>> {
        let mut entries = Vec::new();
        for key in self.store.keys().await? {
            if !key.starts_with(ENTRY_PREFIX) {
                continue;
            }
            if let Some(record) = self.store.get_item(&key).await? {
                entries.push(decode(record.value)?);
            }
        }
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    /// Resets every failed entry without an unresolved conflict to
    /// `Pending`. Returns the entries reset.
    pub async fn reset_failed(&self) -> SyncResult<Vec<SyncLogEntry>> {
        let mut reset = Vec::new();
        for mut entry in self.entries().await? {
            if entry.status != EntryStatus::Failed || has_unresolved_conflict(&entry) {
                continue;
            }
            entry.transition(EntryStatus::Pending)?;
            self.update(&entry).await?;
            reset.push(entry);
        }
        Ok(reset)
    }

    /// Removes an entry. Returns whether it existed.
    pub async fn remove(&self, sequence: u64) -> SyncResult<bool> {
        Ok(self.store.remove_by_key(&entry_key(sequence)).await?)
    }

    /// Returns the sequence the next append will use.
    pub async fn next_sequence(&self) -> u64 {
        *self.next_sequence.lock().await
    }
}

/// Returns true if the entry failed on a conflict nobody has resolved.
pub(crate) fn has_unresolved_conflict(entry: &SyncLogEntry) -> bool {
    entry.status == EntryStatus::Failed
        && entry.failure == Some(FailureKind::Conflict)
        && entry.conflict.as_ref().is_some_and(|c| !c.is_resolved())
}

fn decode(value: StoreValue) -> SyncResult<SyncLogEntry> {
    match value {
        StoreValue::Json(value) => Ok(serde_json::from_value(value)?),
        StoreValue::Bytes(_) => Err(SyncError::Serialization(
            "sync log entry holds bytes".into(),
        )),
    }
}
