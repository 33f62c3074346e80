//! Store managers and request helpers for tests.
//!
//! [`TestRoot`] keeps a temporary directory alive across several
//! [`StoreManager`]s, which is how tests simulate an application restart:
//! shut one manager down, drop it, and open another on the same root.

use offgrid_protocol::{Request, IF_MATCH_HEADER};
use offgrid_storage::{FileFactory, StoreManager, FILE_BACKEND};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A temporary directory backing durable stores.
pub struct TestRoot {
    dir: TempDir,
}

impl TestRoot {
    /// Creates a fresh root.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the root directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Opens a manager whose default backend is a file store on this root.
    ///
    /// The root is locked while the manager's stores are alive; shut the
    /// previous manager down before opening the next one.
    pub fn manager(&self) -> StoreManager {
        let manager = StoreManager::new();
        let factory = FileFactory::open(self.dir.path()).expect("Failed to lock test root");
        manager
            .register_factory(FILE_BACKEND, Arc::new(factory))
            .expect("Failed to register file backend");
        manager
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a manager backed by memory.
pub fn memory_manager() -> StoreManager {
    StoreManager::in_memory()
}

/// Builds a `POST` carrying `body` as JSON.
pub fn json_post(url: &str, body: Value) -> Request {
    Request::post(url).with_json(&body)
}

/// Builds a `PUT` carrying `body` as JSON.
pub fn json_put(url: &str, body: Value) -> Request {
    Request::put(url).with_json(&body)
}

/// Builds a `PATCH` carrying `body` as JSON.
pub fn json_patch(url: &str, body: Value) -> Request {
    Request::patch(url).with_json(&body)
}

/// Builds a conditional `PUT` that only applies at `etag`.
pub fn conditional_put(url: &str, etag: &str, body: Value) -> Request {
    json_put(url, body).with_header(IF_MATCH_HEADER, etag)
}
