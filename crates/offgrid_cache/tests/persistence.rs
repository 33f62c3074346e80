//! Cache behavior over durable backends.

use offgrid_cache::{
    CacheConfig, CacheSource, CacheStrategy, CacheTarget, RequestCache, RESOURCE_STORE,
};
use offgrid_protocol::{Fingerprint, NetworkError, Request, Response};
use offgrid_shred::{JsonStrategy, ShreddingPipeline};
use offgrid_storage::{DocumentFactory, FileFactory, StoreManager, StoreOptions};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn target(url: &str) -> CacheTarget {
    CacheTarget::new(Fingerprint::of(&Request::get(url), &[]), url)
}

async fn open(manager: &StoreManager) -> RequestCache {
    let pipeline = ShreddingPipeline::new()
        .with_strategy(Arc::new(JsonStrategy::new().with_relationship("author", "user")));
    RequestCache::open(manager, &StoreOptions::default(), pipeline, CacheConfig::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn cached_reads_survive_restart() {
    let dir = tempdir().unwrap();
    let body = json!([
        {"id": 1, "title": "a", "author": {"id": "u1", "name": "Bob"}},
        {"id": 2, "title": "b", "author": {"id": "u1", "name": "Bob"}}
    ]);
    let posts = target("/posts").shredded("json", "post");

    {
        let manager = StoreManager::new();
        manager
            .register_factory("file", Arc::new(FileFactory::open(dir.path()).unwrap()))
            .unwrap();
        let cache = open(&manager).await;
        let served = body.clone();
        cache
            .fetch_with(CacheStrategy::NetworkFirst, &posts, move || async move {
                Ok(Response::json_ok(&served))
            })
            .await
            .unwrap();
        manager.shutdown().await.unwrap();
    }

    let manager = StoreManager::new();
    manager
        .register_factory("file", Arc::new(FileFactory::open(dir.path()).unwrap()))
        .unwrap();
    let cache = open(&manager).await;

    let outcome = cache
        .fetch_with(CacheStrategy::NetworkFirst, &posts, || async {
            Err(NetworkError::Unreachable("airplane mode".into()))
        })
        .await
        .unwrap();
    assert_eq!(outcome.source, CacheSource::Offline);
    assert_eq!(outcome.response.json().unwrap(), body);

    // Both posts share one author record.
    let resources = manager
        .open_store(RESOURCE_STORE, &StoreOptions::default())
        .await
        .unwrap();
    assert_eq!(
        resources.keys().await.unwrap(),
        vec!["post/1", "post/2", "user/u1"]
    );
}

#[tokio::test]
async fn concurrent_reads_of_distinct_fingerprints() {
    let manager = StoreManager::new();
    manager
        .register_factory("document", Arc::new(DocumentFactory::in_memory().unwrap()))
        .unwrap();
    let cache = open(&manager).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            let target = target(&format!("/items/{i}"));
            cache
                .fetch_with(CacheStrategy::CacheFirst, &target, move || async move {
                    Ok(Response::new(200).with_body(format!("item {i}")))
                })
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let entries = cache.entries().await.unwrap();
    assert_eq!(entries.len(), 8);
    for i in 0..8 {
        let entry = cache
            .lookup(&target(&format!("/items/{i}")).fingerprint)
            .await
            .unwrap()
            .unwrap();
        let response = cache.materialize(&entry).await.unwrap().unwrap();
        assert_eq!(response.body, format!("item {i}").into_bytes());
    }
}

#[tokio::test]
async fn cache_first_miss_goes_to_network_once() {
    let cache = open(&StoreManager::in_memory()).await;
    let target = target("/settings");
    let first = cache
        .fetch_with(CacheStrategy::CacheFirst, &target, || async {
            Ok(Response::new(200).with_body("v1"))
        })
        .await
        .unwrap();
    assert_eq!(first.source, CacheSource::Network);

    let second = cache
        .fetch_with(CacheStrategy::CacheFirst, &target, || async {
            Ok(Response::new(200).with_body("v2"))
        })
        .await
        .unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(&second.response.body[..], b"v1");
}
