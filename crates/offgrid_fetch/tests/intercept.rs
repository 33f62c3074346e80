//! End-to-end routing through cache, network and sync queue.

use offgrid_cache::{CacheConfig, CacheSource, CacheStrategy, RequestCache};
use offgrid_fetch::{
    EndpointConfig, FetchError, FetchInterceptor, FetchOutcome, InterceptorConfig, QUEUED_STATUS,
};
use offgrid_protocol::{Fingerprint, Request, QUEUED_HEADER};
use offgrid_shred::ShreddingPipeline;
use offgrid_storage::StoreOptions;
use offgrid_sync::{SyncConfig, SyncManager};
use offgrid_testkit::prelude::*;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    server: Arc<MockServer>,
    network: Arc<MockNetwork>,
    sync: Arc<SyncManager>,
    interceptor: FetchInterceptor,
}

async fn harness(config: InterceptorConfig) -> Harness {
    let manager = memory_manager();
    let options = StoreOptions::default();
    let server = Arc::new(MockServer::new());
    server.put_remote("/posts/1", json!({"id": 1, "title": "a", "body": "first"}));
    server.put_remote("/posts/2", json!({"id": 2, "title": "b", "body": "second"}));
    let network = Arc::new(MockNetwork::with_backend(server.clone()));

    let cache = RequestCache::open(
        &manager,
        &options,
        ShreddingPipeline::new(),
        CacheConfig::default(),
    )
    .await
    .unwrap();
    let sync = Arc::new(
        SyncManager::open_in(&manager, &options, network.clone(), SyncConfig::default())
            .await
            .unwrap()
            .with_cache(cache.clone()),
    );
    let interceptor = FetchInterceptor::new(network.clone(), cache)
        .with_sync(Arc::clone(&sync))
        .with_config(config);
    Harness {
        server,
        network,
        sync,
        interceptor,
    }
}

fn completed(outcome: &FetchOutcome) -> (u16, CacheSource) {
    match outcome {
        FetchOutcome::Completed(o) => (o.response.status, o.source),
        other => panic!("expected a completed response, got {other:?}"),
    }
}

#[tokio::test]
async fn network_first_falls_back_to_cache() {
    let h = harness(InterceptorConfig::default()).await;

    let online = h.interceptor.intercept(Request::get("/posts")).await.unwrap();
    assert_eq!(completed(&online), (200, CacheSource::Network));

    h.network.set_offline(true);
    let offline = h.interceptor.intercept(Request::get("/posts")).await.unwrap();
    assert_eq!(completed(&offline), (200, CacheSource::Offline));
    assert_eq!(
        offline.response().unwrap().json().unwrap(),
        online.response().unwrap().json().unwrap()
    );

    let err = h
        .interceptor
        .intercept(Request::get("/users"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NetworkUnavailable(_)));
}

#[tokio::test]
async fn offline_reads_do_not_touch_the_network() {
    let h = harness(InterceptorConfig::default()).await;
    h.interceptor.intercept(Request::get("/posts")).await.unwrap();
    let calls = h.network.call_count();

    h.interceptor.connectivity().set_online(false);
    let outcome = h.interceptor.intercept(Request::get("/posts")).await.unwrap();
    assert_eq!(outcome.source(), Some(CacheSource::Offline));
    assert_eq!(h.network.call_count(), calls);
}

#[tokio::test]
async fn no_cache_endpoints_fail_offline() {
    let config = InterceptorConfig::new()
        .with_endpoint("/live", EndpointConfig::new(CacheStrategy::NoCache));
    let h = harness(config).await;
    h.interceptor.connectivity().set_online(false);
    let err = h
        .interceptor
        .intercept(Request::get("/live/feed"))
        .await
        .unwrap_err();
    assert!(err.is_offline());
}

#[tokio::test]
async fn cached_collection_answers_single_resource_reads() {
    let config = InterceptorConfig::new().with_endpoint(
        "/posts",
        EndpointConfig::default().with_shredding("json", "post"),
    );
    let h = harness(config).await;
    h.interceptor.intercept(Request::get("/posts")).await.unwrap();
    h.interceptor.connectivity().set_online(false);

    let post = h
        .interceptor
        .intercept(Request::get("/posts/2"))
        .await
        .unwrap();
    assert_eq!(post.source(), Some(CacheSource::Offline));
    assert_eq!(
        post.response().unwrap().json().unwrap(),
        json!({"id": 2, "title": "b", "body": "second"})
    );

    let partial = h
        .interceptor
        .intercept(Request::get("/posts/2?fields=title"))
        .await
        .unwrap();
    let body = partial.response().unwrap().json().unwrap();
    assert_eq!(body["title"], "b");
    assert!(body.get("body").is_none());
}

#[tokio::test]
async fn offline_writes_are_queued_and_replayed() {
    let config = InterceptorConfig::new().with_endpoint(
        "/posts",
        EndpointConfig::default().with_optimistic(true),
    );
    let h = harness(config).await;
    h.interceptor.connectivity().set_online(false);

    let created = h
        .interceptor
        .intercept(json_post("/posts", json!({"id": 3, "title": "c"})))
        .await
        .unwrap();
    let FetchOutcome::Optimistic { response, entry } = &created else {
        panic!("expected an optimistic response, got {created:?}");
    };
    assert_eq!(response.status, QUEUED_STATUS);
    assert_eq!(response.header(QUEUED_HEADER), Some("1"));
    assert_eq!(response.json().unwrap(), json!({"id": 3, "title": "c"}));
    assert_eq!(entry.sequence, 1);

    let renamed = h
        .interceptor
        .intercept(json_put("/users/1", json!({"name": "Bob"})))
        .await
        .unwrap();
    assert!(matches!(renamed, FetchOutcome::Queued(_)));
    assert_eq!(
        renamed.into_response().header(QUEUED_HEADER),
        Some("2")
    );
    assert!(h.server.writes().is_empty());

    h.interceptor.connectivity().set_online(true);
    let report = h.sync.sync().await.unwrap();
    assert_eq!(report.submitted, vec![1, 2]);
    assert_eq!(h.server.get("/posts/3"), Some(json!({"id": 3, "title": "c"})));
    assert_eq!(h.server.get("/users/1"), Some(json!({"name": "Bob"})));
}

#[tokio::test]
async fn transport_failure_queues_the_write() {
    let h = harness(InterceptorConfig::default()).await;
    h.network.fail_next(1);

    let outcome = h
        .interceptor
        .intercept(json_put("/posts/1", json!({"title": "z"})))
        .await
        .unwrap();
    assert_eq!(outcome.queued().map(|e| e.sequence), Some(1));
    assert_eq!(h.sync.pending_count().await.unwrap(), 1);
    assert_eq!(h.network.call_count(), 1);
}

#[tokio::test]
async fn remote_refusals_are_returned_not_queued() {
    let h = harness(InterceptorConfig::default()).await;
    let outcome = h
        .interceptor
        .intercept(json_patch("/missing/1", json!({"x": 1})))
        .await
        .unwrap();
    assert_eq!(completed(&outcome), (404, CacheSource::Network));
    assert_eq!(h.sync.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn successful_write_invalidates_related_reads() {
    let h = harness(InterceptorConfig::default()).await;
    let read = Request::get("/posts");
    h.interceptor.intercept(read.clone()).await.unwrap();
    let fingerprint = Fingerprint::of(&read, &[]);
    assert!(h.interceptor.cache().lookup(&fingerprint).await.unwrap().is_some());

    h.interceptor
        .intercept(json_put("/posts/1", json!({"id": 1, "title": "new"})))
        .await
        .unwrap();
    assert!(h.interceptor.cache().lookup(&fingerprint).await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_reads_leave_no_trace() {
    let h = harness(InterceptorConfig::default()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .interceptor
        .intercept_until(Request::get("/posts"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));
    assert_eq!(h.network.call_count(), 0);

    h.network.set_latency(Duration::from_millis(200));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = h
        .interceptor
        .intercept_until(Request::get("/posts"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.interceptor.cache().entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn writes_without_a_queue_surface_the_failure() {
    let manager = memory_manager();
    let network = Arc::new(MockNetwork::new());
    let cache = RequestCache::new(
        manager.open_store("c", &StoreOptions::default()).await.unwrap(),
        manager.open_store("r", &StoreOptions::default()).await.unwrap(),
    );
    let interceptor = FetchInterceptor::new(network.clone(), cache);

    network.fail_next(1);
    let err = interceptor
        .intercept(json_post("/posts", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));

    interceptor.connectivity().set_online(false);
    let err = interceptor
        .intercept(json_post("/posts", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NetworkUnavailable(_)));
}

#[tokio::test]
async fn written_resources_are_not_served_stale_offline() {
    let config = InterceptorConfig::new().with_endpoint(
        "/posts",
        EndpointConfig::default().with_shredding("json", "post"),
    );
    let h = harness(config).await;
    h.interceptor.intercept(Request::get("/posts")).await.unwrap();

    let written = h
        .interceptor
        .intercept(json_put("/posts/2", json!({"id": 2, "title": "NEW"})))
        .await
        .unwrap();
    assert_eq!(completed(&written), (200, CacheSource::Network));

    h.interceptor.connectivity().set_online(false);
    let err = h
        .interceptor
        .intercept(Request::get("/posts/2"))
        .await
        .unwrap_err();
    assert!(err.is_offline());

    h.interceptor.connectivity().set_online(true);
    h.interceptor.intercept(Request::get("/posts/2")).await.unwrap();
    h.interceptor.connectivity().set_online(false);
    let post = h
        .interceptor
        .intercept(Request::get("/posts/2"))
        .await
        .unwrap();
    assert_eq!(post.source(), Some(CacheSource::Offline));
    assert_eq!(post.response().unwrap().json().unwrap()["title"], "NEW");
}

#[tokio::test]
async fn online_writes_wait_behind_queued_writes_to_related_paths() {
    let h = harness(InterceptorConfig::default()).await;
    h.interceptor.connectivity().set_online(false);
    h.interceptor
        .intercept(json_put("/posts/1", json!({"id": 1, "title": "Bob"})))
        .await
        .unwrap();

    h.interceptor.connectivity().set_online(true);
    let carol = h
        .interceptor
        .intercept(json_put("/posts/1", json!({"id": 1, "title": "Carol"})))
        .await
        .unwrap();
    assert_eq!(carol.queued().map(|e| e.sequence), Some(2));
    assert!(h.server.writes().is_empty());

    let unrelated = h
        .interceptor
        .intercept(json_put("/users/1", json!({"name": "Ann"})))
        .await
        .unwrap();
    assert_eq!(completed(&unrelated), (201, CacheSource::Network));

    let report = h.sync.sync().await.unwrap();
    assert_eq!(report.submitted, vec![1, 2]);
    assert_eq!(h.server.get("/posts/1").unwrap()["title"], "Carol");

    let direct = h
        .interceptor
        .intercept(json_put("/posts/1", json!({"id": 1, "title": "Dan"})))
        .await
        .unwrap();
    assert_eq!(completed(&direct), (200, CacheSource::Network));
}
