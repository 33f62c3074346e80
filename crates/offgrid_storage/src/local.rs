//! Flat string-map store backend with a byte quota.
//!
//! Models a browser-style local storage area: one flat namespace of string
//! keys to string values, bounded by a quota. Each record is stored as the
//! JSON encoding of its [`Envelope`] under its raw key. The area can
//! optionally be mirrored to a single JSON file so that it survives restarts.
//! Mirror writes run on the blocking thread pool.

use crate::error::{StoreError, StoreResult};
use crate::keyspace::KeySpace;
use crate::record::{Capabilities, Envelope, Metadata, StoreRecord, StoreValue};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Backend id of [`LocalStore`].
pub const LOCAL_BACKEND: &str = "local";

/// Default quota of a local area, in bytes.
pub const DEFAULT_LOCAL_QUOTA: usize = 5 * 1024 * 1024;

#[derive(Debug)]
struct AreaInner {
    entries: RwLock<BTreeMap<String, String>>,
    quota: usize,
    file: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

/// The shared string map behind every [`LocalStore`] of one factory.
#[derive(Debug, Clone)]
pub struct LocalArea {
    inner: Arc<AreaInner>,
}

impl LocalArea {
    /// Creates a volatile area with the given quota.
    #[must_use]
    pub fn in_memory(quota: usize) -> Self {
        Self::from_parts(BTreeMap::new(), quota, None)
    }

    /// Opens an area mirrored to `path`, loading existing entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path, quota: usize) -> StoreResult<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self::from_parts(entries, quota, Some(path.to_path_buf())))
    }

    fn from_parts(entries: BTreeMap<String, String>, quota: usize, file: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(AreaInner {
                entries: RwLock::new(entries),
                quota,
                file,
                persist_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns the quota in bytes.
    #[must_use]
    pub fn quota(&self) -> usize {
        self.inner.quota
    }

    /// Returns the bytes currently used (keys plus values).
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Returns true if the area is mirrored to a file.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.inner.file.is_some()
    }

    async fn persist(&self) -> StoreResult<()> {
        let Some(path) = self.inner.file.clone() else {
            return Ok(());
        };
        let _guard = self.inner.persist_lock.lock().await;
        let text = serde_json::to_string(&*self.inner.entries.read())?;
        tokio::task::spawn_blocking(move || write_mirror(&path, &text)).await?
    }
}

fn write_mirror(path: &Path, text: &str) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// A store over a [`LocalArea`].
///
/// Writes that would push the area over its quota fail with
/// [`StoreError::QuotaExceeded`] and leave the area unchanged.
#[derive(Debug)]
pub struct LocalStore {
    keyspace: KeySpace,
    area: LocalArea,
    closed: AtomicBool,
}

impl LocalStore {
    /// Creates a store bound to `keyspace` inside `area`.
    #[must_use]
    pub fn new(keyspace: KeySpace, area: LocalArea) -> Self {
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

    async fn retain_raw(&self, mut keep: impl FnMut(&str) -> bool + Send) -> StoreResult<usize> {
        let removed = {
            let mut entries = self.area.inner.entries.write();
            let before = entries.len();
            entries.retain(|raw, _| keep(raw));
            before - entries.len()
        };
        if removed > 0 {
            self.area.persist().await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn backend_id(&self) -> &'static str {
        LOCAL_BACKEND
    }

    fn keyspace(&self) -> &KeySpace {
        &self.keyspace
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: self.area.is_persistent(),
            query: false,
            binary: false,
        }
    }

    async fn init(&self) -> StoreResult<()> {
        if self.area.quota() == 0 {
            return Err(StoreError::init(self.keyspace.name(), "local storage quota is zero"));
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, key: &str, metadata: Metadata, value: StoreValue) -> StoreResult<()> {
        self.ensure_open()?;
        let raw = self.keyspace.raw_key(key);
        let text = Envelope::new(metadata, value).to_json()?;
        {
            let mut entries = self.area.inner.entries.write();
            let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(&raw).map_or(0, |old| raw.len() + old.len());
            let needed = used - replaced + raw.len() + text.len();
            if needed > self.area.quota() {
                return Err(StoreError::QuotaExceeded(format!(
                    "writing '{key}' needs {needed} bytes, quota is {}",
                    self.area.quota()
                )));
            }
            entries.insert(raw, text);
        }
        self.area.persist().await
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<StoreRecord>> {
        self.ensure_open()?;
        let text = self
            .area
            .inner
            .entries
            .read()
            .get(&self.keyspace.raw_key(key))
            .cloned();
        text.map(|t| Envelope::from_json(&t).map(|e| e.into_record(key)))
            .transpose()
    }

    async fn remove_by_key(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let raw = self.keyspace.raw_key(key);
        Ok(self.retain_raw(|k| k != raw).await? > 0)
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let entries = self.area.inner.entries.read();
        Ok(entries
            .keys()
            .filter_map(|raw| self.keyspace.logical_key(raw).map(String::from))
            .collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let prefix = self.keyspace.prefix();
        self.retain_raw(|raw| !raw.starts_with(&prefix)).await?;
        Ok(())
    }

    async fn purge_other_versions(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        self.retain_raw(|raw| !self.keyspace.is_other_version(raw))
            .await
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn store(area: &LocalArea, name: &str) -> LocalStore {
        LocalStore::new(KeySpace::new(name, "0").unwrap(), area.clone())
    }

    #[tokio::test]
    async fn local_quota_rejects_oversized_write() {
        let area = LocalArea::in_memory(128);
        let s = store(&area, "cache");
        s.init().await.unwrap();

        s.upsert("small", Metadata::new(), json!("x").into())
            .await
            .unwrap();
        let used = area.used_bytes();

        let big = "y".repeat(256);
        let err = s
            .upsert("big", Metadata::new(), json!(big).into())
            .await
            .unwrap_err();
        assert!(err.is_quota());
        assert_eq!(area.used_bytes(), used);
        assert!(s.get_item("big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_replacement_counts_old_size_once() {
        let area = LocalArea::in_memory(200);
        let s = store(&area, "cache");
        let value = "z".repeat(100);
        s.upsert("k", Metadata::new(), json!(value).into())
            .await
            .unwrap();
        // Replacing with an equally sized value fits even though two copies
        // would not.
        s.upsert("k", Metadata::new(), json!(value).into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn local_zero_quota_fails_init() {
        let s = store(&LocalArea::in_memory(0), "cache");
        assert!(matches!(s.init().await, Err(StoreError::Init { .. })));
    }

    #[tokio::test]
    async fn local_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.json");

        {
            let area = LocalArea::open(&path, DEFAULT_LOCAL_QUOTA).unwrap();
            let s = store(&area, "notes");
            s.upsert("a", Metadata::new(), json!({"n": 1}).into())
                .await
                .unwrap();
            s.upsert("b", Metadata::new(), vec![7u8, 8].into())
                .await
                .unwrap();
        }

        let area = LocalArea::open(&path, DEFAULT_LOCAL_QUOTA).unwrap();
        let s = store(&area, "notes");
        assert!(s.capabilities().durable);
        assert_eq!(s.keys().await.unwrap(), vec!["a", "b"]);
        let b = s.get_item("b").await.unwrap().unwrap();
        assert_eq!(b.value, StoreValue::Bytes(vec![7, 8]));
    }

    #[tokio::test]
    async fn local_purge_other_versions() {
        let area = LocalArea::in_memory(DEFAULT_LOCAL_QUOTA);
        let old = LocalStore::new(KeySpace::new("notes", "1").unwrap(), area.clone());
        let new = LocalStore::new(KeySpace::new("notes", "2").unwrap(), area.clone());
        old.upsert("a", Metadata::new(), json!(1).into()).await.unwrap();
        new.upsert("a", Metadata::new(), json!(2).into()).await.unwrap();

        assert_eq!(new.purge_other_versions().await.unwrap(), 1);
        assert_eq!(new.keys().await.unwrap(), vec!["a"]);
        assert!(old.keys().await.unwrap().is_empty());
    }
}
