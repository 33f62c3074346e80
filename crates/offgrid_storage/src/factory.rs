//! Store factories for the built-in backends.
//!
//! A factory owns whatever a backend shares between stores (a memory area,
//! a locked directory, a database connection) and stamps out one store per
//! keyspace. Factories report their capabilities once, when registered with
//! a [`StoreManager`](crate::StoreManager).

use crate::document::{DocumentDatabase, DocumentStore};
use crate::error::StoreResult;
use crate::file::{FileRoot, FileStore};
use crate::keyspace::KeySpace;
use crate::local::{LocalArea, LocalStore};
use crate::memory::{MemoryArea, MemoryStore};
use crate::record::Capabilities;
use crate::store::KeyValueStore;
use std::path::Path;
use std::sync::Arc;

/// Creates stores for one backend.
///
/// `create` must not perform I/O; one-time setup belongs in
/// [`KeyValueStore::init`], which the manager calls exactly once per open.
pub trait StoreFactory: Send + Sync {
    /// Returns what stores created by this factory support.
    fn capabilities(&self) -> Capabilities;

    /// Creates an uninitialized store bound to `keyspace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot host the keyspace.
    fn create(&self, keyspace: KeySpace) -> StoreResult<Arc<dyn KeyValueStore>>;
}

/// Factory for [`MemoryStore`]s sharing one [`MemoryArea`].
#[derive(Debug, Clone, Default)]
pub struct MemoryFactory {
    area: MemoryArea,
}

impl MemoryFactory {
    /// Creates a factory with a fresh area.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory over an existing area.
    #[must_use]
    pub fn with_area(area: MemoryArea) -> Self {
        Self { area }
    }

    /// Returns the shared area.
    #[must_use]
    pub fn area(&self) -> &MemoryArea {
        &self.area
    }
}

impl StoreFactory for MemoryFactory {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: false,
            query: false,
            binary: true,
        }
    }

    fn create(&self, keyspace: KeySpace) -> StoreResult<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(MemoryStore::new(keyspace, self.area.clone())))
    }
}

/// Factory for [`LocalStore`]s sharing one [`LocalArea`].
#[derive(Debug, Clone)]
pub struct LocalFactory {
    area: LocalArea,
}

impl LocalFactory {
    /// Creates a factory over `area`.
    #[must_use]
    pub fn new(area: LocalArea) -> Self {
        Self { area }
    }
}

impl StoreFactory for LocalFactory {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: self.area.is_persistent(),
            query: false,
            binary: false,
        }
    }

    fn create(&self, keyspace: KeySpace) -> StoreResult<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(LocalStore::new(keyspace, self.area.clone())))
    }
}

/// Factory for [`FileStore`]s under one locked root directory.
#[derive(Debug, Clone)]
pub struct FileFactory {
    root: FileRoot,
}

impl FileFactory {
    /// Opens and locks `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`](crate::StoreError::Locked) if another
    /// process owns the directory.
    pub fn open(root: &Path) -> StoreResult<Self> {
        Ok(Self {
            root: FileRoot::open(root)?,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Lists the keyspaces stored under the root.
    pub fn keyspaces(&self) -> StoreResult<Vec<KeySpace>> {
        self.root.keyspaces()
    }
}

impl StoreFactory for FileFactory {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: true,
            query: false,
            binary: true,
        }
    }

    fn create(&self, keyspace: KeySpace) -> StoreResult<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(FileStore::new(keyspace, self.root.clone())))
    }
}

/// Factory for [`DocumentStore`]s sharing one SQLite database.
#[derive(Debug, Clone)]
pub struct DocumentFactory {
    db: DocumentDatabase,
}

impl DocumentFactory {
    /// Opens the database file at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            db: DocumentDatabase::open(path)?,
        })
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self {
            db: DocumentDatabase::in_memory()?,
        })
    }
}

impl StoreFactory for DocumentFactory {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: true,
            query: true,
            binary: false,
        }
    }

    fn create(&self, keyspace: KeySpace) -> StoreResult<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(DocumentStore::new(keyspace, self.db.clone())))
    }
}
