//! SQLite document store backend.
//!
//! Records live in a single `documents` table keyed by raw key, with the
//! store name and version in their own columns so that a keyspace is an
//! indexed range. Metadata is kept as JSON text; [`Query`] conditions are
//! evaluated over the decoded metadata, which makes this the one backend
//! answering [`KeyValueStore::find`].
//!
//! Statements run on the blocking thread pool.

use crate::error::{StoreError, StoreResult};
use crate::keyspace::KeySpace;
use crate::record::{Capabilities, Envelope, Metadata, Query, StoreRecord, StoreValue};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Backend id of [`DocumentStore`].
pub const DOCUMENT_BACKEND: &str = "document";

const DOCUMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    raw_key TEXT PRIMARY KEY,
    store TEXT NOT NULL,
    version TEXT NOT NULL,
    key TEXT NOT NULL,
    metadata TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_keyspace
    ON documents(store, version, key);
"#;

/// A SQLite connection shared by every document store of one factory.
#[derive(Debug, Clone)]
pub struct DocumentDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentDatabase {
    /// Opens (or creates) a database file and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(DOCUMENT_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock())).await?
    }
}

/// A queryable store over a [`DocumentDatabase`].
#[derive(Debug)]
pub struct DocumentStore {
    keyspace: KeySpace,
    db: DocumentDatabase,
    closed: AtomicBool,
}

impl DocumentStore {
    /// Creates a store bound to `keyspace` inside `db`.
    #[must_use]
    pub fn new(keyspace: KeySpace, db: DocumentDatabase) -> Self {
        Self {
            keyspace,
            db,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.keyspace.name().to_string()));
        }
        Ok(())
    }

    async fn scan(&self) -> StoreResult<Vec<StoreRecord>> {
        let keyspace = self.keyspace.clone();
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, metadata, value FROM documents
                     WHERE store = ?1 AND version = ?2 ORDER BY key",
                )?;
                let rows = stmt.query_map(params![keyspace.name(), keyspace.version()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;

                let mut records = Vec::new();
                for row in rows {
                    let (key, metadata, value) = row?;
                    records.push(decode(key, &metadata, &value)?);
                }
                Ok(records)
            })
            .await
    }
}

fn decode(key: String, metadata: &str, value: &str) -> StoreResult<StoreRecord> {
    let metadata: Metadata = serde_json::from_str(metadata)?;
    let value: StoreValue = serde_json::from_str(value)?;
    Ok(Envelope::new(metadata, value).into_record(key))
}

#[async_trait]
impl KeyValueStore for DocumentStore {
    fn backend_id(&self) -> &'static str {
        DOCUMENT_BACKEND
    }

    fn keyspace(&self) -> &KeySpace {
        &self.keyspace
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            durable: true,
            query: true,
            binary: false,
        }
    }

    async fn init(&self) -> StoreResult<()> {
        self.db
            .run(|conn| Ok(conn.execute_batch(DOCUMENT_SCHEMA)?))
            .await
            .map_err(|e| StoreError::init(self.keyspace.name(), e))?;
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, key: &str, metadata: Metadata, value: StoreValue) -> StoreResult<()> {
        self.ensure_open()?;
        let metadata = serde_json::to_string(&metadata)?;
        let value = serde_json::to_string(&value)?;
        let keyspace = self.keyspace.clone();
        let key = key.to_string();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO documents (raw_key, store, version, key, metadata, value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        keyspace.raw_key(&key),
                        keyspace.name(),
                        keyspace.version(),
                        key,
                        metadata,
                        value
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<StoreRecord>> {
        self.ensure_open()?;
        let raw = self.keyspace.raw_key(key);
        let row = self
            .db
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT metadata, value FROM documents WHERE raw_key = ?1",
                        params![raw],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?)
            })
            .await?;
        row.map(|(metadata, value)| decode(key.to_string(), &metadata, &value))
            .transpose()
    }

    async fn remove_by_key(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let raw = self.keyspace.raw_key(key);
        let changed = self
            .db
            .run(move |conn| {
                Ok(conn.execute("DELETE FROM documents WHERE raw_key = ?1", params![raw])?)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let keyspace = self.keyspace.clone();
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key FROM documents WHERE store = ?1 AND version = ?2 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(params![keyspace.name(), keyspace.version()], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
    }

    async fn find(&self, query: &Query) -> StoreResult<Vec<StoreRecord>> {
        self.ensure_open()?;
        let mut records: Vec<StoreRecord> = self
            .scan()
            .await?
            .into_iter()
            .filter(|record| query.matches(&record.metadata))
            .collect();
        query.finish(&mut records);
        Ok(records)
    }

    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let keyspace = self.keyspace.clone();
        self.db
            .run(move |conn| {
                conn.execute(
                    "DELETE FROM documents WHERE store = ?1 AND version = ?2",
                    params![keyspace.name(), keyspace.version()],
                )?;
                Ok(())
            })
            .await
    }

    async fn purge_other_versions(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        let keyspace = self.keyspace.clone();
        self.db
            .run(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM documents WHERE store = ?1 AND version <> ?2",
                    params![keyspace.name(), keyspace.version()],
                )?)
            })
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
    use crate::record::Comparison;
    use serde_json::json;
    use tempfile::tempdir;

    fn meta(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    async fn store(db: &DocumentDatabase, name: &str, version: &str) -> DocumentStore {
        let s = DocumentStore::new(KeySpace::new(name, version).unwrap(), db.clone());
        s.init().await.unwrap();
        s
    }

    #[tokio::test]
    async fn document_find_filters_on_metadata() {
        let db = DocumentDatabase::in_memory().unwrap();
        let s = store(&db, "resources", "0").await;
        for (key, kind, rank) in [("u1", "user", 3), ("u2", "user", 1), ("p1", "post", 2)] {
            s.upsert(key, meta(json!({"type": kind, "rank": rank})), json!({}).into())
                .await
                .unwrap();
        }

        let users = s
            .find(
                &Query::new()
                    .filter("type", Comparison::Eq, json!("user"))
                    .order_by("rank"),
            )
            .await
            .unwrap();
        let keys: Vec<_> = users.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["u2", "u1"]);
    }

    #[tokio::test]
    async fn document_keyspaces_share_one_table() {
        let db = DocumentDatabase::in_memory().unwrap();
        let a = store(&db, "a", "0").await;
        let b = store(&db, "b", "0").await;
        a.upsert("k", Metadata::new(), json!("a").into()).await.unwrap();
        b.upsert("k", Metadata::new(), json!("b").into()).await.unwrap();

        assert_eq!(
            a.get_item("k").await.unwrap().unwrap().value,
            StoreValue::Json(json!("a"))
        );
        a.clear().await.unwrap();
        assert!(a.get_item("k").await.unwrap().is_none());
        assert!(b.get_item("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn document_durable_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.sqlite");
        {
            let db = DocumentDatabase::open(&path).unwrap();
            let s = store(&db, "notes", "0").await;
            s.upsert("a", meta(json!({"etag": "1"})), vec![9u8].into())
                .await
                .unwrap();
        }
        let db = DocumentDatabase::open(&path).unwrap();
        let s = store(&db, "notes", "0").await;
        let record = s.get_item("a").await.unwrap().unwrap();
        assert_eq!(record.value, StoreValue::Bytes(vec![9]));
        assert_eq!(record.metadata, meta(json!({"etag": "1"})));
    }

    #[tokio::test]
    async fn document_purge_other_versions() {
        let db = DocumentDatabase::in_memory().unwrap();
        let old = store(&db, "notes", "1").await;
        old.upsert("a", Metadata::new(), json!(1).into()).await.unwrap();
        let new = store(&db, "notes", "2").await;
        assert_eq!(new.purge_other_versions().await.unwrap(), 1);
        assert!(!new.remove_by_key("a").await.unwrap());
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn busy_connection_does_not_stall_the_runtime() {
        let db = DocumentDatabase::in_memory().unwrap();
        let s = store(&db, "cache", "0").await;
        let busy = db.conn.lock();

        let write = tokio::spawn(async move {
            s.upsert("k", Metadata::new(), json!(1).into()).await?;
            s.get_item("k").await
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!write.is_finished());

        drop(busy);
        let record = write.await.unwrap().unwrap().unwrap();
        assert_eq!(record.value, StoreValue::Json(json!(1)));
    }
}
