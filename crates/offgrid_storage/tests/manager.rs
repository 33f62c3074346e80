//! Integration tests for store lifecycle and key isolation.

use async_trait::async_trait;
use offgrid_storage::{
    Capabilities, DocumentFactory, FileFactory, KeySpace, KeyValueStore, LocalArea, LocalFactory,
    MemoryArea, MemoryStore, Metadata, StoreFactory, StoreManager, StoreOptions, StoreRecord,
    StoreResult, StoreValue,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// A memory store whose `init` is slow and counted.
struct CountingStore {
    inner: MemoryStore,
    inits: Arc<AtomicUsize>,
}

#[async_trait]
impl KeyValueStore for CountingStore {
    fn backend_id(&self) -> &'static str {
        "counting"
    }

    fn keyspace(&self) -> &KeySpace {
        self.inner.keyspace()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn init(&self) -> StoreResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.init().await
    }

    async fn upsert(&self, key: &str, metadata: Metadata, value: StoreValue) -> StoreResult<()> {
        self.inner.upsert(key, metadata, value).await
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<StoreRecord>> {
        self.inner.get_item(key).await
    }

    async fn remove_by_key(&self, key: &str) -> StoreResult<bool> {
        self.inner.remove_by_key(key).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await
    }

    async fn purge_other_versions(&self) -> StoreResult<usize> {
        self.inner.purge_other_versions().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

#[derive(Default)]
struct CountingFactory {
    area: MemoryArea,
    inits: Arc<AtomicUsize>,
    creates: AtomicUsize,
}

impl StoreFactory for CountingFactory {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn create(&self, keyspace: KeySpace) -> StoreResult<Arc<dyn KeyValueStore>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingStore {
            inner: MemoryStore::new(keyspace, self.area.clone()),
            inits: Arc::clone(&self.inits),
        }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_open_initializes_once() {
    let factory = Arc::new(CountingFactory::default());
    let manager = Arc::new(StoreManager::new());
    manager
        .register_factory("counting", Arc::clone(&factory) as Arc<dyn StoreFactory>)
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager
                .open_store("shared", &StoreOptions::default())
                .await
                .unwrap()
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(factory.inits.load(Ordering::SeqCst), 1);
    assert_eq!(factory.creates.load(Ordering::SeqCst), 1);
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_and_delete_are_serialized() {
    let factory = Arc::new(CountingFactory::default());
    let manager = Arc::new(StoreManager::new());
    manager
        .register_factory("counting", Arc::clone(&factory) as Arc<dyn StoreFactory>)
        .unwrap();

    let store = manager
        .open_store("shared", &StoreOptions::default())
        .await
        .unwrap();
    store
        .upsert("k", Metadata::new(), json!("v").into())
        .await
        .unwrap();

    // Delete first, then open: the open must observe the completed delete
    // and initialize a fresh handle.
    let deleting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.delete_store("shared").await })
    };
    deleting.await.unwrap().unwrap();
    let reopened = manager
        .open_store("shared", &StoreOptions::default())
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&store, &reopened));
    assert!(reopened.get_item("k").await.unwrap().is_none());
    // open, sweep during delete, reopen
    assert_eq!(factory.inits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn backend_selection_prefers_explicit_option() {
    let dir = tempdir().unwrap();
    let manager = StoreManager::in_memory();
    manager
        .register_factory("file", Arc::new(FileFactory::open(dir.path()).unwrap()))
        .unwrap();
    manager
        .register_factory("document", Arc::new(DocumentFactory::in_memory().unwrap()))
        .unwrap();
    manager
        .register_factory(
            "local",
            Arc::new(LocalFactory::new(LocalArea::in_memory(1024 * 1024))),
        )
        .unwrap();

    let default = manager
        .open_store("a", &StoreOptions::default())
        .await
        .unwrap();
    assert_eq!(default.backend_id(), "memory");

    let file = manager
        .open_store("b", &StoreOptions::default().with_backend("file"))
        .await
        .unwrap();
    assert_eq!(file.backend_id(), "file");
    assert!(file.capabilities().durable);

    manager.set_default_backend("document").unwrap();
    let doc = manager
        .open_store("c", &StoreOptions::default())
        .await
        .unwrap();
    assert!(doc.capabilities().query);

    assert_eq!(manager.capabilities("local").map(|c| c.durable), Some(false));
    assert!(manager.set_default_backend("nope").is_err());
}

#[tokio::test]
async fn file_records_survive_manager_restart() {
    let dir = tempdir().unwrap();
    {
        let manager = StoreManager::new();
        manager
            .register_factory("file", Arc::new(FileFactory::open(dir.path()).unwrap()))
            .unwrap();
        let store = manager
            .open_store("notes", &StoreOptions::default().with_version("3"))
            .await
            .unwrap();
        store
            .upsert("n1", Metadata::new(), json!({"text": "hi"}).into())
            .await
            .unwrap();
        manager.shutdown().await.unwrap();
    }

    let manager = StoreManager::new();
    manager
        .register_factory("file", Arc::new(FileFactory::open(dir.path()).unwrap()))
        .unwrap();
    let store = manager
        .open_store("notes", &StoreOptions::default().with_version("3"))
        .await
        .unwrap();
    assert_eq!(store.keys().await.unwrap(), vec!["n1"]);
}

fn keyspace_part() -> impl Strategy<Value = String> {
    "[a-z0-9_.-]{1,6}".prop_filter("reserved", |s| s != "." && s != "..")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn writes_never_cross_keyspaces(
        name_a in keyspace_part(),
        version_a in keyspace_part(),
        name_b in keyspace_part(),
        version_b in keyspace_part(),
        key in ".{0,12}",
    ) {
        prop_assume!((&name_a, &version_a) != (&name_b, &version_b));

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let area = MemoryArea::new();
            let a = MemoryStore::new(KeySpace::new(name_a, version_a).unwrap(), area.clone());
            let b = MemoryStore::new(KeySpace::new(name_b, version_b).unwrap(), area.clone());

            a.upsert(&key, Metadata::new(), json!("a").into()).await.unwrap();
            prop_assert!(b.get_item(&key).await.unwrap().is_none());
            prop_assert!(b.keys().await.unwrap().is_empty());
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn delete_removes_unopened_versions_on_every_backend() {
    let dir = tempdir().unwrap();
    let manager = StoreManager::in_memory();
    manager
        .register_factory("file", Arc::new(FileFactory::open(dir.path()).unwrap()))
        .unwrap();
    manager
        .register_factory("document", Arc::new(DocumentFactory::in_memory().unwrap()))
        .unwrap();

    for (backend, version) in [("memory", "3"), ("file", "2"), ("document", "0")] {
        let options = StoreOptions::default()
            .with_backend(backend)
            .with_version(version);
        let store = manager.open_store("cache", &options).await.unwrap();
        store
            .upsert("k", Metadata::new(), json!(backend).into())
            .await
            .unwrap();
        manager.close_store("cache").await.unwrap();
    }
    let kept = manager
        .open_store("other", &StoreOptions::default().with_backend("file"))
        .await
        .unwrap();
    kept.upsert("k", Metadata::new(), json!(1).into())
        .await
        .unwrap();

    manager.delete_store("cache").await.unwrap();

    for (backend, version) in [("memory", "3"), ("file", "2"), ("document", "0")] {
        let options = StoreOptions::default()
            .with_backend(backend)
            .with_version(version);
        let store = manager.open_store("cache", &options).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty(), "{backend}");
        manager.close_store("cache").await.unwrap();
    }
    assert_eq!(kept.keys().await.unwrap(), vec!["k"]);
}
