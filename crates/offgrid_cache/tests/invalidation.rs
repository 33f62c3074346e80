//! Writes evict exactly the cached reads they could have changed.

use offgrid_cache::{CacheTarget, RequestCache};
use offgrid_protocol::{paths_related, url_path, Fingerprint, Request, Response};
use offgrid_storage::{StoreManager, StoreOptions};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

fn path() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["users", "posts", "1", "2", "tags"]), 1..4)
        .prop_map(|segments| format!("/{}", segments.join("/")))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn invalidation_matches_related_paths(
        cached in prop::collection::btree_set(path(), 1..8),
        written in path(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let manager = StoreManager::in_memory();
            let options = StoreOptions::default();
            let cache = RequestCache::new(
                manager.open_store("entries", &options).await.unwrap(),
                manager.open_store("resources", &options).await.unwrap(),
            );
            for url in &cached {
                let target = CacheTarget::new(Fingerprint::of(&Request::get(url.as_str()), &[]), url.as_str());
                cache.store(&target, &Response::json_ok(&json!({"url": url}))).await.unwrap();
            }

            let removed = cache.invalidate_related(&format!("{written}?x=1")).await.unwrap();

            let remaining: BTreeSet<String> =
                cache.entries().await.unwrap().into_iter().map(|e| e.url).collect();
            let expected: BTreeSet<String> = cached
                .iter()
                .filter(|url| !paths_related(&url_path(url), &written))
                .cloned()
                .collect();
            prop_assert_eq!(removed, cached.len() - expected.len());
            prop_assert_eq!(remaining, expected);
            Ok(())
        })?;
    }
}
