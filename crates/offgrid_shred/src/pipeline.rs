//! Strategy registry plus record persistence.

use crate::binary::BinaryStrategy;
use crate::error::{ShredError, ShredResult};
use crate::json::JsonStrategy;
use crate::resource::{Layout, QueryDescriptor, RequestDescriptor, ResourceRef, Shredded, ShreddedResource};
use crate::rest::RestStrategy;
use crate::strategy::{Resolved, ShreddingStrategy};
use offgrid_storage::{KeyValueStore, Metadata, StoreValue};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Shreds payloads into a resource store and reassembles them.
///
/// Records are stored under `<type>/<id>` with `type` and `id` metadata, so
/// a queryable backend can also search them directly. Blobs are stored
/// under their layout key.
///
/// # Persistence rules
///
/// - Top-level records of a full response replace the stored record
/// - Embedded records, and every record of a field-limited response, are
///   merged into the stored record so that cached fields are never erased
///   by a narrower response
pub struct ShreddingPipeline {
    strategies: HashMap<String, Arc<dyn ShreddingStrategy>>,
    write_lock: Mutex<()>,
}

impl Default for ShreddingPipeline {
    fn default() -> Self {
        Self::empty()
            .with_strategy(Arc::new(JsonStrategy::new()))
            .with_strategy(Arc::new(RestStrategy::new()))
            .with_strategy(Arc::new(BinaryStrategy))
    }
}

impl std::fmt::Debug for ShreddingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.strategies.keys().collect();
        names.sort();
        f.debug_struct("ShreddingPipeline")
            .field("strategies", &names)
            .finish_non_exhaustive()
    }
}

impl ShreddingPipeline {
    /// Creates a pipeline with the `json`, `rest` and `binary` strategies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipeline with no strategies.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Registers a strategy under its name, replacing any previous one.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn ShreddingStrategy>) -> Self {
        self.strategies.insert(strategy.name().to_string(), strategy);
        self
    }

    /// Looks up a strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ShredError::UnknownStrategy`] if nothing is registered.
    pub fn strategy(&self, name: &str) -> ShredResult<&Arc<dyn ShreddingStrategy>> {
        self.strategies
            .get(name)
            .ok_or_else(|| ShredError::UnknownStrategy(name.to_string()))
    }

    /// Splits `body` with the named strategy without storing anything.
    pub fn shred(
        &self,
        strategy: &str,
        body: &[u8],
        request: &RequestDescriptor,
    ) -> ShredResult<Shredded> {
        self.strategy(strategy)?.shred(body, request)
    }

    /// Shreds `body` and persists the records. Returns the descriptor to
    /// keep for reassembly.
    pub async fn shred_into(
        &self,
        strategy: &str,
        body: &[u8],
        request: &RequestDescriptor,
        store: &dyn KeyValueStore,
    ) -> ShredResult<QueryDescriptor> {
        let shredded = self.shred(strategy, body, request)?;
        self.persist(&shredded, store).await?;
        Ok(shredded.descriptor)
    }

    /// Writes shredded records to `store`.
    ///
    /// A failed write may leave some records written.
    pub async fn persist(&self, shredded: &Shredded, store: &dyn KeyValueStore) -> ShredResult<()> {
        let _guard = self.write_lock.lock().await;

        if let (Some(blob), Layout::Blob { key }) = (&shredded.blob, &shredded.descriptor.layout) {
            let mut metadata = Metadata::new();
            metadata.insert("type".into(), json!("blob"));
            store
                .upsert(key, metadata, StoreValue::Bytes(blob.clone()))
                .await?;
        }

        for resource in &shredded.resources {
            if shredded.partial {
                merge_resource(store, resource).await?;
            } else {
                write_resource(store, resource).await?;
            }
        }
        for resource in &shredded.embedded {
            merge_resource(store, resource).await?;
        }

        debug!(
            strategy = %shredded.descriptor.strategy,
            resources = shredded.resources.len(),
            embedded = shredded.embedded.len(),
            "persisted shredded payload"
        );
        Ok(())
    }

    /// Reassembles a response body from stored records.
    ///
    /// Returns `None` if any record the descriptor needs is missing.
    pub async fn unshred(
        &self,
        strategy: &str,
        query: &QueryDescriptor,
        store: &dyn KeyValueStore,
    ) -> ShredResult<Option<Vec<u8>>> {
        let strategy = self.strategy(strategy)?;
        let Some(resolved) = load(query, store).await? else {
            return Ok(None);
        };
        strategy.unshred(query, &resolved)
    }

    /// Answers a single-resource request from records cached by earlier
    /// responses, possibly of other URLs.
    ///
    /// Returns `None` if the strategy cannot answer queries, the request
    /// names no id, or the record is not cached.
    pub async fn query(
        &self,
        strategy: &str,
        request: &RequestDescriptor,
        store: &dyn KeyValueStore,
    ) -> ShredResult<Option<Vec<u8>>> {
        if !self.strategy(strategy)?.supports_query() {
            return Ok(None);
        }
        let Some(id) = &request.id else {
            return Ok(None);
        };
        let query = QueryDescriptor {
            strategy: strategy.to_string(),
            layout: Layout::Single {
                resource: ResourceRef::new(request.resource_type.clone(), id.clone()),
            },
            fields: request.fields.clone(),
        };
        self.unshred(strategy, &query, store).await
    }
}

/// Reads one stored record.
pub async fn load_resource(
    store: &dyn KeyValueStore,
    reference: &ResourceRef,
) -> ShredResult<Option<ShreddedResource>> {
    let Some(record) = store.get_item(&reference.key()).await? else {
        return Ok(None);
    };
    match record.value {
        StoreValue::Json(value) => Ok(Some(serde_json::from_value(value)?)),
        StoreValue::Bytes(_) => Err(ShredError::UnexpectedShape(format!(
            "record {} holds bytes, expected a resource",
            reference.key()
        ))),
    }
}

async fn write_resource(store: &dyn KeyValueStore, resource: &ShreddedResource) -> ShredResult<()> {
    let mut metadata = Metadata::new();
    metadata.insert("type".into(), json!(resource.resource_type));
    metadata.insert("id".into(), json!(resource.id));
    store
        .upsert(
            &resource.key(),
            metadata,
            StoreValue::Json(serde_json::to_value(resource)?),
        )
        .await?;
    Ok(())
}

async fn merge_resource(store: &dyn KeyValueStore, resource: &ShreddedResource) -> ShredResult<()> {
    match load_resource(store, &resource.reference()).await? {
        Some(mut existing) => {
            existing.merge(resource.clone());
            write_resource(store, &existing).await
        }
        None => write_resource(store, resource).await,
    }
}

/// Loads every record the descriptor needs, following relationships.
async fn load(query: &QueryDescriptor, store: &dyn KeyValueStore) -> ShredResult<Option<Resolved>> {
    let mut resolved = Resolved::new();

    if let Layout::Blob { key } = &query.layout {
        return match store.get_item(key).await? {
            Some(record) => match record.value {
                StoreValue::Bytes(bytes) => {
                    resolved.set_blob(bytes);
                    Ok(Some(resolved))
                }
                StoreValue::Json(_) => Err(ShredError::UnexpectedShape(format!(
                    "blob {key} holds json"
                ))),
            },
            None => Ok(None),
        };
    }

    let mut queue: VecDeque<ResourceRef> = query.layout.resources().into_iter().cloned().collect();
    let mut seen: HashSet<ResourceRef> = HashSet::new();
    while let Some(reference) = queue.pop_front() {
        if !seen.insert(reference.clone()) {
            continue;
        }
        let Some(resource) = load_resource(store, &reference).await? else {
            return Ok(None);
        };
        for relationship in resource.relationships.values() {
            queue.extend(relationship.refs().into_iter().cloned());
        }
        resolved.insert(resource);
    }
    Ok(Some(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use offgrid_storage::{KeySpace, MemoryArea, MemoryStore};
    use serde_json::Value;

    fn store() -> MemoryStore {
        MemoryStore::new(KeySpace::new("resources", "0").unwrap(), MemoryArea::new())
    }

    #[tokio::test]
    async fn shred_into_store_and_back() {
        let pipeline = ShreddingPipeline::new();
        let store = store();
        let body = br#"[{"id": 1, "name": "Bob"}, {"id": 2, "name": "Carol"}]"#;
        let query = pipeline
            .shred_into("json", body, &RequestDescriptor::new("/users", "user"), &store)
            .await
            .unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["user/1", "user/2"]);
        let out = pipeline.unshred("json", &query, &store).await.unwrap().unwrap();
        let a: Value = serde_json::from_slice(body).unwrap();
        let b: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn single_resource_answered_from_collection() {
        let pipeline = ShreddingPipeline::new();
        let store = store();
        pipeline
            .shred_into(
                "rest",
                br#"{"items": [{"id": 42, "name": "Bob", "email": "b@x"}], "total": 1}"#,
                &RequestDescriptor::new("/users", "user"),
                &store,
            )
            .await
            .unwrap();

        let request = RequestDescriptor::new("/users/42", "user")
            .with_id("42")
            .with_fields(["name"]);
        let out = pipeline.query("rest", &request, &store).await.unwrap().unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&out).unwrap(),
            serde_json::json!({"name": "Bob"})
        );

        let missing = RequestDescriptor::new("/users/7", "user").with_id("7");
        assert!(pipeline.query("rest", &missing, &store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_response_does_not_erase_fields() {
        let pipeline = ShreddingPipeline::new();
        let store = store();
        pipeline
            .shred_into(
                "json",
                br#"{"id": 1, "name": "Bob", "email": "b@x"}"#,
                &RequestDescriptor::new("/users/1", "user"),
                &store,
            )
            .await
            .unwrap();
        pipeline
            .shred_into(
                "json",
                br#"{"name": "Robert"}"#,
                &RequestDescriptor::new("/users/1?fields=name", "user").with_fields(["name"]),
                &store,
            )
            .await
            .unwrap_err();
        pipeline
            .shred_into(
                "json",
                br#"{"id": 1, "name": "Robert"}"#,
                &RequestDescriptor::new("/users/1?fields=id,name", "user").with_fields(["id", "name"]),
                &store,
            )
            .await
            .unwrap();

        let record = load_resource(&store, &ResourceRef::new("user", "1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.attributes["name"], serde_json::json!("Robert"));
        assert_eq!(record.attributes["email"], serde_json::json!("b@x"));
    }

    #[tokio::test]
    async fn binary_blobs_round_trip() {
        let pipeline = ShreddingPipeline::new();
        let store = store();
        let body = vec![1u8, 2, 3, 255];
        let query = pipeline
            .shred_into("binary", &body, &RequestDescriptor::new("/files/a.bin", ""), &store)
            .await
            .unwrap();
        assert_eq!(
            pipeline.unshred("binary", &query, &store).await.unwrap(),
            Some(body)
        );
        assert!(pipeline.query("binary", &RequestDescriptor::default(), &store)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_strategy() {
        let pipeline = ShreddingPipeline::empty();
        let err = pipeline
            .shred("json", b"{}", &RequestDescriptor::new("/", "x"))
            .unwrap_err();
        assert!(matches!(err, ShredError::UnknownStrategy(_)));
    }
}
