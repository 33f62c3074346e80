//! Key-value store trait definition.

use crate::error::{StoreError, StoreResult};
use crate::keyspace::KeySpace;
use crate::record::{Capabilities, Metadata, Query, StoreRecord, StoreValue};
use async_trait::async_trait;

/// A single named, versioned key -> (metadata, value) table.
///
/// A store instance is bound to one [`KeySpace`]. Backends decide how raw
/// keys are laid out, but two stores with different keyspaces never see each
/// other's records.
///
/// # Invariants
///
/// - Logical keys are unique within a keyspace
/// - `upsert` and `remove_by_key` are atomic with respect to each other on
///   the same key: implementations serialize access to the store
/// - A failed write may still have left partial state; callers re-read
///   before deciding how to recover
/// - `find` returns [`StoreError::QueryUnsupported`] on backends without the
///   `query` capability rather than incomplete results
///
/// # Implementors
///
/// - [`super::MemoryStore`] - ephemeral, flat namespace
/// - [`super::LocalStore`] - flat string namespace with a byte quota
/// - [`super::FileStore`] - one file per record
/// - [`super::DocumentStore`] - SQLite documents, supports queries
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the backend id this store was created by.
    fn backend_id(&self) -> &'static str;

    /// Returns the keyspace this store is bound to.
    fn keyspace(&self) -> &KeySpace;

    /// Returns what this backend supports.
    fn capabilities(&self) -> Capabilities;

    /// One-time setup (create directories, tables, validate quota).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Init`] if the backend is unavailable.
    async fn init(&self) -> StoreResult<()>;

    /// Inserts or replaces the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the backend is out of space
    /// ([`StoreError::QuotaExceeded`]) or an I/O error occurs.
    async fn upsert(&self, key: &str, metadata: Metadata, value: StoreValue) -> StoreResult<()>;

    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    async fn get_item(&self, key: &str) -> StoreResult<Option<StoreRecord>>;

    /// Alias of [`get_item`](Self::get_item) kept for callers that use the
    /// query-style naming.
    async fn find_by_key(&self, key: &str) -> StoreResult<Option<StoreRecord>> {
        self.get_item(key).await
    }

    /// Removes the record stored under `key`.
    ///
    /// Returns whether a record existed.
    async fn remove_by_key(&self, key: &str) -> StoreResult<bool>;

    /// Lists logical keys in ascending order.
    async fn keys(&self) -> StoreResult<Vec<String>>;

    /// Runs a structured query over record metadata.
    ///
    /// # Errors
    ///
    /// The default implementation returns [`StoreError::QueryUnsupported`].
    async fn find(&self, _query: &Query) -> StoreResult<Vec<StoreRecord>> {
        Err(StoreError::QueryUnsupported {
            backend: self.backend_id(),
        })
    }

    /// Removes every record of this keyspace.
    async fn clear(&self) -> StoreResult<()>;

    /// Removes records of the same store name stored under other versions.
    ///
    /// Returns the number of records removed.
    async fn purge_other_versions(&self) -> StoreResult<usize>;

    /// Releases backend resources. Further calls fail with
    /// [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}
