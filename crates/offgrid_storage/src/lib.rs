//! # offgrid Storage
//!
//! Versioned key-value stores with pluggable backends.
//!
//! Every store is a single named, versioned table of
//! `key -> (metadata, value)` records. Stores are opened through a
//! [`StoreManager`], which selects a backend, runs its one-time
//! initialization and caches the open handle per name.
//!
//! ## Design Principles
//!
//! - One async contract ([`KeyValueStore`]) for every backend
//! - Raw keys are derived by [`KeySpace`]; different `(name, version)` pairs
//!   can never collide on a shared backend
//! - Backends advertise [`Capabilities`] instead of failing silently:
//!   `find` on a key-only backend is an error, not an empty result
//! - Records are persisted as an [`Envelope`] in the backend's native
//!   encoding (JSON text or CBOR bytes)
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - ephemeral, shared flat namespace
//! - [`LocalStore`] - flat string map with a byte quota, optionally mirrored
//!   to a file
//! - [`FileStore`] - one CBOR file per record under a locked directory
//! - [`DocumentStore`] - SQLite documents with metadata queries
//!
//! ## Example
//!
//! ```rust
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! use offgrid_storage::{Metadata, StoreManager, StoreOptions, StoreValue};
//! use serde_json::json;
//!
//! let manager = StoreManager::in_memory();
//! let store = manager.open_store("notes", &StoreOptions::default()).await.unwrap();
//! store.upsert("n1", Metadata::new(), json!({"text": "hi"}).into()).await.unwrap();
//!
//! let record = store.get_item("n1").await.unwrap().unwrap();
//! assert_eq!(record.value, StoreValue::Json(json!({"text": "hi"})));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod factory;
mod file;
mod keyspace;
mod local;
mod manager;
mod memory;
mod record;
mod store;

pub use document::{DocumentDatabase, DocumentStore, DOCUMENT_BACKEND};
pub use error::{StoreError, StoreResult};
pub use factory::{DocumentFactory, FileFactory, LocalFactory, MemoryFactory, StoreFactory};
pub use file::{FileRoot, FileStore, FILE_BACKEND};
pub use keyspace::{
    key_from_file_name, KeySpace, DEFAULT_VERSION, DIGEST_RECORD_EXTENSION, KEY_SEPARATOR,
    MAX_NAMED_KEY_BYTES, RECORD_EXTENSION,
};
pub use local::{LocalArea, LocalStore, DEFAULT_LOCAL_QUOTA, LOCAL_BACKEND};
pub use manager::{StoreManager, StoreOptions, DEFAULT_MEMORY_BACKEND};
pub use memory::{MemoryArea, MemoryStore, MEMORY_BACKEND};
pub use record::{Capabilities, Comparison, Condition, Envelope, Metadata, Query, StoreRecord, StoreValue};
pub use store::KeyValueStore;
