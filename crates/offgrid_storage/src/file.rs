//! One-file-per-record store backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/
//! ├─ LOCK                       # Advisory lock, one process per root
//! └─ <name>/<version>/
//!    ├─ <hex(key)>.rec          # CBOR-encoded envelope
//!    └─ <sha256(key)>.hrec      # Envelope of a long key, key embedded
//! ```
//!
//! Writes go to a temporary sibling file which is synced and then renamed
//! over the record, so a crash leaves either the old or the new record.

use crate::error::{StoreError, StoreResult};
use crate::keyspace::{is_digest_file_name, is_digest_named, key_from_file_name, KeySpace};
use crate::record::{Capabilities, Envelope, Metadata, StoreRecord, StoreValue};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Backend id of [`FileStore`].
pub const FILE_BACKEND: &str = "file";

const LOCK_FILE: &str = "LOCK";
const TEMP_EXTENSION: &str = "tmp";

/// An exclusively locked root directory shared by file stores.
///
/// The lock is released when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct FileRoot {
    path: PathBuf,
    _lock_file: Arc<File>,
}

impl FileRoot {
    /// Creates `path` if needed and takes the advisory lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the lock, or
    /// an I/O error if the directory cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path.display().to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: Arc::new(lock_file),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists the keyspaces that have a directory under the root, sorted.
    /// Directories that are not valid keyspace names are skipped.
    pub fn keyspaces(&self) -> StoreResult<Vec<KeySpace>> {
        let mut found = Vec::new();
        for name in std::fs::read_dir(&self.path)? {
            let name = name?;
            if !name.file_type()?.is_dir() {
                continue;
            }
            for version in std::fs::read_dir(name.path())? {
                let version = version?;
                if !version.file_type()?.is_dir() {
                    continue;
                }
                let name_os = name.file_name();
                let version_os = version.file_name();
                let (Some(n), Some(v)) = (name_os.to_str(), version_os.to_str())
                else {
                    continue;
                };
                if let Ok(keyspace) = KeySpace::new(n, v) {
                    found.push(keyspace);
                }
            }
        }
        found.sort_by(|a, b| (a.name(), a.version()).cmp(&(b.name(), b.version())));
        Ok(found)
    }
}

/// A durable store writing one file per record.
///
/// Operations on one store are serialized through an internal queue, so an
/// `upsert` and a `remove_by_key` on the same key never interleave.
#[derive(Debug)]
pub struct FileStore {
    keyspace: KeySpace,
    root: FileRoot,
    queue: Mutex<()>,
    closed: AtomicBool,
}

impl FileStore {
    /// Creates a store bound to `keyspace` under `root`.
    #[must_use]
    pub fn new(keyspace: KeySpace, root: FileRoot) -> Self {
        Self {
            keyspace,
            root,
            queue: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.keyspace.name().to_string()));
        }
        Ok(())
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.keyspace.file_path(self.root.path(), key)
    }
}

/// Returns the logical key of a record file, reading digest-named records.
async fn stored_key(path: &Path, file_name: &str) -> StoreResult<Option<String>> {
    if let Some(key) = key_from_file_name(file_name) {
        return Ok(Some(key));
    }
    if !is_digest_file_name(file_name) {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(Envelope::from_cbor(&bytes)?.key)
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn backend_id(&self) -> &'static str {
        FILE_BACKEND
    }

    fn keyspace(&self) -> &KeySpace {
        &self.keyspace
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: true,
            query: false,
            binary: true,
        }
    }

    async fn init(&self) -> StoreResult<()> {
        let dir = self.keyspace.directory(self.root.path());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::init(self.keyspace.name(), e))?;
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, key: &str, metadata: Metadata, value: StoreValue) -> StoreResult<()> {
        self.ensure_open()?;
        let mut envelope = Envelope::new(metadata, value);
        if is_digest_named(key) {
            envelope = envelope.with_key(key);
        }
        let bytes = envelope.to_cbor()?;
        let path = self.record_path(key);
        let tmp = path.with_extension(TEMP_EXTENSION);

        let _queue = self.queue.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<StoreRecord>> {
        self.ensure_open()?;
        let _queue = self.queue.lock().await;
        match tokio::fs::read(self.record_path(key)).await {
            Ok(bytes) => {
                let envelope = Envelope::from_cbor(&bytes)?;
                if is_digest_named(key) && envelope.key.as_deref() != Some(key) {
                    return Ok(None);
                }
                Ok(Some(envelope.into_record(key)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_by_key(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let _queue = self.queue.lock().await;
        match tokio::fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let _queue = self.queue.lock().await;
        let dir = self.keyspace.directory(self.root.path());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(key) = stored_key(&entry.path(), &file_name).await? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let _queue = self.queue.lock().await;
        let dir = self.keyspace.directory(self.root.path());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn purge_other_versions(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        let _queue = self.queue.lock().await;
        let name_dir = self.root.path().join(self.keyspace.name());
        let mut versions = match tokio::fs::read_dir(&name_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(version) = versions.next_entry().await? {
            if version.file_name().to_str() == Some(self.keyspace.version()) {
                continue;
            }
            if !version.file_type().await?.is_dir() {
                continue;
            }
            let mut records = tokio::fs::read_dir(version.path()).await?;
            while let Some(record) = records.next_entry().await? {
                if record
                    .file_name()
                    .to_str()
                    .is_some_and(|n| key_from_file_name(n).is_some() || is_digest_file_name(n))
                {
                    removed += 1;
                }
            }
            tokio::fs::remove_dir_all(version.path()).await?;
        }
        Ok(removed)
    }

    async fn close(&self) -> StoreResult<()> {
        let _queue = self.queue.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
