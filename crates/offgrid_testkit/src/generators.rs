//! Property-based test generators using proptest.

use offgrid_protocol::{Method, Request};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for store names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_.]{0,23}").expect("Invalid regex")
}

/// Strategy for record keys, including the separator-like characters
/// stores must escape.
pub fn record_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9/#. _-]{1,32}").expect("Invalid regex")
}

/// Strategy for one of a handful of collection paths.
pub fn collection_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["/notes", "/users", "/orders", "/tags"])
}

/// Strategy for small flat JSON objects.
pub fn json_object_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..5).prop_map(|fields| {
        Value::Object(fields.into_iter().map(|(k, v)| (k, json!(v))).collect())
    })
}

/// Strategy for mutating requests against [`collection_strategy`] paths.
pub fn write_request_strategy() -> impl Strategy<Value = Request> {
    (
        prop::sample::select(vec![Method::Post, Method::Put, Method::Patch, Method::Delete]),
        collection_strategy(),
        1u32..20,
        json_object_strategy(),
    )
        .prop_map(|(method, collection, id, body)| match method {
            Method::Post => Request::post(collection).with_json(&body),
            Method::Delete => Request::delete(format!("{collection}/{id}")),
            method => Request::new(method, format!("{collection}/{id}")).with_json(&body),
        })
}

/// Strategy for a sequence of mutating requests.
pub fn write_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Request>> {
    prop::collection::vec(write_request_strategy(), 1..=max)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn writes_are_mutating(request in write_request_strategy()) {
            prop_assert!(request.method.is_mutating());
            prop_assert!(request.url.starts_with('/'));
        }

        #[test]
        fn store_names_are_nonempty(name in store_name_strategy()) {
            prop_assert!(!name.is_empty());
        }
    }
}
