//! REST-convention strategy: collection envelopes with links and paging.

use crate::error::{ShredError, ShredResult};
use crate::json::JsonStrategy;
use crate::resource::{Layout, QueryDescriptor, RequestDescriptor, ShreddedResource, Shredded};
use crate::strategy::{Resolved, ShreddingStrategy};
use serde_json::{Map, Value};

/// Name of [`RestStrategy`].
pub const REST_STRATEGY: &str = "rest";

/// Handles paginated envelopes such as
/// `{"items": [...], "links": {"next": "..."}, "total": 40}`.
///
/// The array is shredded with an inner [`JsonStrategy`]; every other
/// top-level field is kept verbatim in the layout. Bodies without a
/// collection field are handled exactly like the JSON strategy.
#[derive(Debug, Clone)]
pub struct RestStrategy {
    inner: JsonStrategy,
    collection_fields: Vec<String>,
}

impl Default for RestStrategy {
    fn default() -> Self {
        Self {
            inner: JsonStrategy::new(),
            collection_fields: vec!["items".into(), "data".into(), "results".into()],
        }
    }
}

impl RestStrategy {
    /// Creates a strategy recognizing `items`, `data` and `results`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `inner` for the records.
    #[must_use]
    pub fn with_records(mut self, inner: JsonStrategy) -> Self {
        self.inner = inner;
        self
    }

    /// Replaces the recognized collection field names.
    #[must_use]
    pub fn with_collection_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collection_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    fn collection_field<'a>(&self, object: &'a Map<String, Value>) -> Option<(&str, &'a [Value])> {
        self.collection_fields.iter().find_map(|field| {
            object
                .get(field)
                .and_then(Value::as_array)
                .map(|items| (field.as_str(), items.as_slice()))
        })
    }
}

impl ShreddingStrategy for RestStrategy {
    fn name(&self) -> &str {
        REST_STRATEGY
    }

    fn supports_query(&self) -> bool {
        true
    }

    fn shred(&self, body: &[u8], request: &RequestDescriptor) -> ShredResult<Shredded> {
        let value: Value = serde_json::from_slice(body)?;
        let envelope = value
            .as_object()
            .and_then(|object| self.collection_field(object).map(|found| (object, found)));

        let Some((object, (field, items))) = envelope else {
            let mut shredded = self.inner.shred(body, request)?;
            shredded.descriptor.strategy = self.name().to_string();
            return Ok(shredded);
        };

        if request.resource_type.is_empty() {
            return Err(ShredError::UnexpectedShape(
                "request descriptor has no resource type".into(),
            ));
        }

        let mut embedded = Vec::new();
        let resources = self
            .inner
            .shred_array(items, &request.resource_type, &mut embedded)?;
        let extras: Map<String, Value> = object
            .iter()
            .filter(|(k, _)| k.as_str() != field)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let shredded = Shredded {
            descriptor: QueryDescriptor {
                strategy: self.name().to_string(),
                layout: Layout::Envelope {
                    collection_field: field.to_string(),
                    resources: resources.iter().map(ShreddedResource::reference).collect(),
                    extras,
                },
                fields: request.fields.clone(),
            },
            resources,
            embedded,
            partial: request.is_partial(),
            blob: None,
        };
        shredded.check_copies()?;
        Ok(shredded)
    }

    fn unshred(&self, query: &QueryDescriptor, resolved: &Resolved) -> ShredResult<Option<Vec<u8>>> {
        let Layout::Envelope {
            collection_field,
            resources,
            extras,
        } = &query.layout
        else {
            return self.inner.unshred(query, resolved);
        };

        let Some(items) = self
            .inner
            .assemble(resources, query.fields.as_deref(), resolved)
        else {
            return Ok(None);
        };
        let mut object = extras.clone();
        object.insert(collection_field.clone(), Value::Array(items));
        Ok(Some(serde_json::to_vec(&Value::Object(object))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip() {
        let strategy = RestStrategy::new();
        let body = json!({
            "items": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}],
            "links": {"next": "/users?page=2"},
            "total": 40
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        let shredded = strategy
            .shred(&bytes, &RequestDescriptor::new("/users", "user"))
            .unwrap();
        assert_eq!(shredded.resources.len(), 2);
        assert!(matches!(
            &shredded.descriptor.layout,
            Layout::Envelope { extras, .. } if extras.contains_key("links")
        ));

        let out = strategy
            .unshred(&shredded.descriptor, &Resolved::from_shredded(&shredded))
            .unwrap()
            .unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&out).unwrap(), body);
    }

    #[test]
    fn plain_object_falls_through_to_records() {
        let strategy = RestStrategy::new();
        let shredded = strategy
            .shred(br#"{"id": 5, "name": "x"}"#, &RequestDescriptor::new("/users/5", "user"))
            .unwrap();
        assert_eq!(shredded.descriptor.strategy, "rest");
        assert!(matches!(shredded.descriptor.layout, Layout::Single { .. }));
        let out = strategy
            .unshred(&shredded.descriptor, &Resolved::from_shredded(&shredded))
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&out).unwrap(),
            json!({"id": 5, "name": "x"})
        );
    }

    #[test]
    fn custom_collection_field() {
        let strategy = RestStrategy::new().with_collection_fields(["entries"]);
        let shredded = strategy
            .shred(
                br#"{"entries": [{"id": "a"}], "page": 1}"#,
                &RequestDescriptor::new("/log", "entry"),
            )
            .unwrap();
        assert!(matches!(
            &shredded.descriptor.layout,
            Layout::Envelope { collection_field, .. } if collection_field == "entries"
        ));
    }
}
