//! In-memory store backend.

use crate::error::{StoreError, StoreResult};
use crate::keyspace::KeySpace;
use crate::record::{Capabilities, Envelope, Metadata, StoreRecord, StoreValue};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Backend id of [`MemoryStore`].
pub const MEMORY_BACKEND: &str = "memory";

/// A flat raw-key namespace shared by every store created from one factory.
///
/// Raw keys are `name#version#key`, so stores sharing an area stay isolated
/// by construction.
#[derive(Debug, Clone, Default)]
pub struct MemoryArea {
    records: Arc<RwLock<BTreeMap<String, Envelope>>>,
}

impl MemoryArea {
    /// Creates an empty area.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of raw records across all keyspaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the area holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns a copy of every raw key.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn raw_keys(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }
}

/// An in-memory key-value store.
///
/// Records are lost when the last handle to the [`MemoryArea`] is dropped.
/// Suitable for tests and for caches that do not need to survive a restart.
///
/// # Example
///
/// ```rust
/// # tokio_test_block(async {
/// use offgrid_storage::{KeySpace, KeyValueStore, MemoryArea, MemoryStore, Metadata};
/// use serde_json::json;
///
/// let store = MemoryStore::new(KeySpace::new("notes", "0").unwrap(), MemoryArea::new());
/// store.init().await.unwrap();
/// store.upsert("a", Metadata::new(), json!({"title": "hi"}).into()).await.unwrap();
/// assert_eq!(store.keys().await.unwrap(), vec!["a".to_string()]);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    keyspace: KeySpace,
    area: MemoryArea,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates a store bound to `keyspace` inside `area`.
    #[must_use]
    pub fn new(keyspace: KeySpace, area: MemoryArea) -> Self {
        Self {
            keyspace,
            area,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.keyspace.name().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend_id(&self) -> &'static str {
        MEMORY_BACKEND
    }

    fn keyspace(&self) -> &KeySpace {
        &self.keyspace
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: false,
            query: false,
            binary: true,
        }
    }

    async fn init(&self) -> StoreResult<()> {
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, key: &str, metadata: Metadata, value: StoreValue) -> StoreResult<()> {
        self.ensure_open()?;
        self.area
            .records
            .write()
            .insert(self.keyspace.raw_key(key), Envelope::new(metadata, value));
        Ok(())
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<StoreRecord>> {
        self.ensure_open()?;
        let records = self.area.records.read();
        Ok(records
            .get(&self.keyspace.raw_key(key))
            .cloned()
            .map(|envelope| envelope.into_record(key)))
    }

    async fn remove_by_key(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self
            .area
            .records
            .write()
            .remove(&self.keyspace.raw_key(key))
            .is_some())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let prefix = self.keyspace.prefix();
        let records = self.area.records.read();
        Ok(records
            .range(prefix.clone()..)
            .take_while(|(raw, _)| raw.starts_with(&prefix))
            .filter_map(|(raw, _)| self.keyspace.logical_key(raw).map(String::from))
            .collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let prefix = self.keyspace.prefix();
        self.area
            .records
            .write()
            .retain(|raw, _| !raw.starts_with(&prefix));
        Ok(())
    }

    async fn purge_other_versions(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        let mut records = self.area.records.write();
        let before = records.len();
        records.retain(|raw, _| !self.keyspace.is_other_version(raw));
        Ok(before - records.len())
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
