//! Store lifecycle management.
//!
//! [`StoreManager`] owns the mapping from store name to open handle. Each
//! name has a slot guarded by an async mutex that is held for the whole of
//! an open or delete, so:
//!
//! - concurrent opens of an unopened name run `init` once and all resolve
//!   to the same handle
//! - an open and a delete of the same name never interleave; whichever
//!   acquires the slot first completes before the other starts

use crate::error::{StoreError, StoreResult};
use crate::factory::{MemoryFactory, StoreFactory};
use crate::keyspace::{KeySpace, DEFAULT_VERSION};
use crate::record::Capabilities;
use crate::store::KeyValueStore;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backend id under which [`StoreManager::in_memory`] registers its factory.
pub const DEFAULT_MEMORY_BACKEND: &str = "memory";

/// Options for opening a store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Store version. Changing it partitions the keyspace.
    pub version: String,
    /// Explicit backend id. Falls back to the manager's default.
    pub backend: Option<String>,
    /// Capabilities the chosen backend must have.
    pub require: Capabilities,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            backend: None,
            require: Capabilities::NONE,
        }
    }
}

impl StoreOptions {
    /// Sets the store version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Selects a backend explicitly.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Requires capabilities of the backend.
    #[must_use]
    pub fn requiring(mut self, require: Capabilities) -> Self {
        self.require = require;
        self
    }
}

struct Registered {
    factory: Arc<dyn StoreFactory>,
    capabilities: Capabilities,
}

type Slot = tokio::sync::Mutex<Option<Arc<dyn KeyValueStore>>>;

/// Creates, caches and tears down named stores.
///
/// Managers are independent of each other; there is no process-wide store
/// cache.
///
/// # Example
///
/// ```rust
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use offgrid_storage::{StoreManager, StoreOptions};
/// use std::sync::Arc;
///
/// let manager = StoreManager::in_memory();
/// let a = manager.open_store("cache", &StoreOptions::default()).await.unwrap();
/// let b = manager.open_store("cache", &StoreOptions::default()).await.unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// # });
/// ```
#[derive(Default)]
pub struct StoreManager {
    factories: RwLock<HashMap<String, Registered>>,
    default_backend: RwLock<Option<String>>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut backends: Vec<_> = self.factories.read().keys().cloned().collect();
        backends.sort();
        f.debug_struct("StoreManager")
            .field("backends", &backends)
            .field("default_backend", &*self.default_backend.read())
            .finish_non_exhaustive()
    }
}

impl StoreManager {
    /// Creates a manager with no registered backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager with a memory backend registered as the default.
    #[must_use]
    pub fn in_memory() -> Self {
        let manager = Self::new();
        manager.factories.write().insert(
            DEFAULT_MEMORY_BACKEND.to_string(),
            Registered {
                capabilities: MemoryFactory::new().capabilities(),
                factory: Arc::new(MemoryFactory::new()),
            },
        );
        *manager.default_backend.write() = Some(DEFAULT_MEMORY_BACKEND.to_string());
        manager
    }

    /// Registers a factory under `backend_id`.
    ///
    /// The factory's capabilities are recorded here and used for every later
    /// selection; they are not queried again per open. The first registered
    /// backend becomes the default until [`set_default_backend`] is called.
    ///
    /// [`set_default_backend`]: Self::set_default_backend
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateBackend`] if the id is taken.
    pub fn register_factory(
        &self,
        backend_id: impl Into<String>,
        factory: Arc<dyn StoreFactory>,
    ) -> StoreResult<()> {
        let backend_id = backend_id.into();
        let mut factories = self.factories.write();
        if factories.contains_key(&backend_id) {
            return Err(StoreError::DuplicateBackend(backend_id));
        }
        let capabilities = factory.capabilities();
        debug!(backend = %backend_id, ?capabilities, "registered store factory");
        factories.insert(
            backend_id.clone(),
            Registered {
                factory,
                capabilities,
            },
        );
        self.default_backend.write().get_or_insert(backend_id);
        Ok(())
    }

    /// Makes `backend_id` the backend used when options name none.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownBackend`] if nothing is registered
    /// under the id.
    pub fn set_default_backend(&self, backend_id: &str) -> StoreResult<()> {
        if !self.factories.read().contains_key(backend_id) {
            return Err(StoreError::UnknownBackend(backend_id.to_string()));
        }
        *self.default_backend.write() = Some(backend_id.to_string());
        Ok(())
    }

    /// Returns the capabilities recorded for a backend.
    #[must_use]
    pub fn capabilities(&self, backend_id: &str) -> Option<Capabilities> {
        self.factories.read().get(backend_id).map(|r| r.capabilities)
    }

    /// Opens the named store, or returns the already-open handle.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownBackend`] if the selected backend is not
    ///   registered (or no default exists)
    /// - [`StoreError::MissingCapability`] if the backend lacks a required
    ///   capability
    /// - [`StoreError::VersionMismatch`] if the store is open under another
    ///   version
    /// - [`StoreError::Init`] or other backend errors from `init`
    pub async fn open_store(
        &self,
        name: &str,
        options: &StoreOptions,
    ) -> StoreResult<Arc<dyn KeyValueStore>> {
        let slot = self.slot(name);
        let mut handle = slot.lock().await;

        if let Some(store) = handle.as_ref() {
            if store.keyspace().version() != options.version {
                return Err(StoreError::VersionMismatch {
                    store: name.to_string(),
                    open: store.keyspace().version().to_string(),
                    requested: options.version.clone(),
                });
            }
            if let Some(backend) = &options.backend {
                if backend != store.backend_id() {
                    warn!(
                        store = name,
                        open = store.backend_id(),
                        requested = %backend,
                        "store already open on another backend, returning open handle"
                    );
                }
            }
            return Ok(Arc::clone(store));
        }

        let store = self.create(name, options).await?;
        *handle = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Closes the named store and removes all of its records.
    ///
    /// Records are removed under every version on every registered backend,
    /// so a store that is not open, or was last opened with other options,
    /// is deleted completely.
    pub async fn delete_store(&self, name: &str) -> StoreResult<()> {
        let keyspace = KeySpace::new(name, DEFAULT_VERSION)?;
        let slot = self.slot(name);
        let mut handle = slot.lock().await;

        if let Some(store) = handle.take() {
            store.clear().await?;
            store.close().await?;
        }

        let factories: Vec<(String, Arc<dyn StoreFactory>)> = self
            .factories
            .read()
            .iter()
            .map(|(id, registered)| (id.clone(), Arc::clone(&registered.factory)))
            .collect();
        for (backend, factory) in factories {
            let store = factory.create(keyspace.clone())?;
            store.init().await?;
            store.clear().await?;
            let other_versions = store.purge_other_versions().await?;
            store.close().await?;
            debug!(store = name, %backend, other_versions, "swept store on backend");
        }
        info!(store = name, "deleted store");
        Ok(())
    }

    /// Closes the named store without removing records.
    ///
    /// Returns whether the store was open.
    pub async fn close_store(&self, name: &str) -> StoreResult<bool> {
        let slot = self.slot(name);
        let mut handle = slot.lock().await;
        match handle.take() {
            Some(store) => {
                store.close().await?;
                debug!(store = name, "closed store");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes records of `name` stored under versions other than the open
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] if the store is not open.
    pub async fn purge_stale_versions(&self, name: &str) -> StoreResult<usize> {
        let slot = self.slot(name);
        let handle = slot.lock().await;
        let store = handle
            .as_ref()
            .ok_or_else(|| StoreError::Closed(name.to_string()))?;
        let removed = store.purge_other_versions().await?;
        info!(store = name, removed, "purged stale versions");
        Ok(removed)
    }

    /// Returns the names of open stores, sorted.
    pub async fn open_stores(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();

        let mut names = Vec::new();
        for (name, slot) in slots {
            if slot.lock().await.is_some() {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    /// Closes every open store.
    ///
    /// Every store is closed even if some fail; the first error is returned.
    pub async fn shutdown(&self) -> StoreResult<()> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();

        let mut first_error = None;
        for (name, slot) in slots {
            if let Some(store) = slot.lock().await.take() {
                if let Err(e) = store.close().await {
                    warn!(store = %name, error = %e, "failed to close store");
                    first_error.get_or_insert(e);
                }
            }
        }
        info!("store manager shut down");
        first_error.map_or(Ok(()), Err)
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        Arc::clone(
            self.slots
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None))),
        )
    }

    /// Selects a backend, creates the store and runs `init`.
    ///
    /// Callers hold the slot lock.
    async fn create(
        &self,
        name: &str,
        options: &StoreOptions,
    ) -> StoreResult<Arc<dyn KeyValueStore>> {
        let keyspace = KeySpace::new(name, options.version.clone())?;
        let backend_id = match &options.backend {
            Some(id) => id.clone(),
            None => self
                .default_backend
                .read()
                .clone()
                .ok_or_else(|| StoreError::UnknownBackend("<default>".to_string()))?,
        };

        let factory = {
            let factories = self.factories.read();
            let registered = factories
                .get(&backend_id)
                .ok_or_else(|| StoreError::UnknownBackend(backend_id.clone()))?;
            if let Some(capability) = registered.capabilities.missing(&options.require) {
                return Err(StoreError::MissingCapability {
                    backend: backend_id,
                    capability,
                });
            }
            Arc::clone(&registered.factory)
        };

        let store = factory.create(keyspace)?;
        store.init().await?;
        info!(store = name, version = %options.version, backend = %backend_id, "opened store");
        Ok(store)
    }
}
