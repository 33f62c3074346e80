//! Round-trip law: reassembling shredded records reproduces the payload.

use offgrid_shred::{
    JsonStrategy, RequestDescriptor, RestStrategy, ShredError, ShreddingPipeline,
};
use offgrid_storage::{KeySpace, KeyValueStore, MemoryArea, MemoryStore};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ]{0,8}".prop_map(Value::String),
    ]
}

fn attribute() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => scalar(),
        1 => prop::collection::vec(scalar(), 0..4).prop_map(Value::Array),
        1 => prop::collection::btree_map("[a-z]{1,4}", scalar(), 0..3)
            .prop_map(|m| Value::Object(m.into_iter().collect())),
    ]
}

fn id() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0u32..4).prop_map(|n| json!(n)),
        (0u32..4).prop_map(|n| json!(n.to_string())),
    ]
}

/// Records drawn from a small id space, so repeated and equivalent ids
/// (`1` and `"1"`) are common, as are owners embedded with differing names.
fn records() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(
        (
            id(),
            prop::collection::btree_map("[a-z]{1,5}", attribute(), 0..4),
            prop::option::of((0u32..3, "[ab]")),
        ),
        0..6,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(id, attrs, owner)| {
                let mut object: Map<String, Value> = attrs
                    .into_iter()
                    .filter(|(k, _)| k != "id" && k != "owner")
                    .collect();
                object.insert("id".into(), id);
                if let Some((owner, name)) = owner {
                    object.insert(
                        "owner".into(),
                        json!({"id": format!("u{owner}"), "name": name}),
                    );
                }
                Value::Object(object)
            })
            .collect()
    })
}

fn pipeline() -> ShreddingPipeline {
    ShreddingPipeline::empty()
        .with_strategy(Arc::new(
            JsonStrategy::new().with_relationship("owner", "user"),
        ))
        .with_strategy(Arc::new(RestStrategy::new().with_records(
            JsonStrategy::new().with_relationship("owner", "user"),
        )))
}

/// Shreds and reassembles `body`. Returns `None` when the payload holds
/// disagreeing copies of one record, which the pipeline refuses to shred.
fn round_trip(strategy: &str, body: &Value) -> Option<Value> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        let pipeline = pipeline();
        let store = MemoryStore::new(KeySpace::new("resources", "0").unwrap(), MemoryArea::new());
        let bytes = serde_json::to_vec(body).unwrap();
        let query = match pipeline
            .shred_into(strategy, &bytes, &RequestDescriptor::new("/things", "thing"), &store)
            .await
        {
            Ok(query) => query,
            Err(ShredError::ConflictingCopies(_)) => return None,
            Err(e) => panic!("shredding failed: {e}"),
        };
        let out = pipeline
            .unshred(strategy, &query, &store)
            .await
            .unwrap()
            .unwrap();
        Some(serde_json::from_slice(&out).unwrap())
    })
}

#[tokio::test]
async fn disagreeing_copies_are_refused() {
    let pipeline = pipeline();
    let store = MemoryStore::new(KeySpace::new("resources", "0").unwrap(), MemoryArea::new());
    let descriptor = RequestDescriptor::new("/things", "thing");
    let payloads = [
        json!([{"id": 1, "a": 1}, {"id": "1", "b": 2}]),
        json!([
            {"id": 1, "owner": {"id": "u2", "name": "short"}},
            {"id": 2, "owner": {"id": "u2", "name": "full", "email": "e"}}
        ]),
    ];
    for payload in payloads {
        let bytes = serde_json::to_vec(&payload).unwrap();
        let err = pipeline
            .shred_into("json", &bytes, &descriptor, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, ShredError::ConflictingCopies(_)), "{err}");
    }
    assert!(store.keys().await.unwrap().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn json_collections_round_trip(items in records()) {
        let body = Value::Array(items);
        if let Some(out) = round_trip("json", &body) {
            prop_assert_eq!(out, body);
        }
    }

    #[test]
    fn json_objects_round_trip(items in records()) {
        if let Some(first) = items.into_iter().next() {
            let out = round_trip("json", &first);
            prop_assert_eq!(out, Some(first));
        }
    }

    #[test]
    fn rest_envelopes_round_trip(items in records(), total in 0u32..100) {
        let body = json!({
            "items": items,
            "total": total,
            "links": {"self": "/things", "next": null},
        });
        if let Some(out) = round_trip("rest", &body) {
            prop_assert_eq!(out, body);
        }
    }
}
