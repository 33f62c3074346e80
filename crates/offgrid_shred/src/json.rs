//! Generic JSON strategy: an object or an array of objects keyed by an id
//! field.

use crate::error::{ShredError, ShredResult};
use crate::resource::{
    Layout, QueryDescriptor, Relationship, RequestDescriptor, ResourceRef, Shredded,
    ShreddedResource,
};
use crate::strategy::{Resolved, ShreddingStrategy};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Name of [`JsonStrategy`].
pub const JSON_STRATEGY: &str = "json";

/// Relationship nesting deeper than this is reassembled without its own
/// relationships, which bounds reassembly of cyclic references.
const MAX_EMBED_DEPTH: usize = 16;

/// Shreds a JSON object or array of objects into one record per object.
///
/// Fields named as relationships whose value is an object (or a non-empty
/// array of objects) carrying the id field are extracted into records of
/// their own and replaced by references; reassembly embeds them again.
///
/// # Example
///
/// ```rust
/// use offgrid_shred::{JsonStrategy, RequestDescriptor, Resolved, ShreddingStrategy};
///
/// let strategy = JsonStrategy::new().with_relationship("author", "user");
/// let body = br#"{"id": 1, "title": "Hi", "author": {"id": 7, "name": "Bob"}}"#;
/// let shredded = strategy.shred(body, &RequestDescriptor::new("/posts/1", "post")).unwrap();
/// assert_eq!(shredded.resources[0].key(), "post/1");
/// assert_eq!(shredded.embedded[0].key(), "user/7");
///
/// let resolved = Resolved::from_shredded(&shredded);
/// let again = strategy.unshred(&shredded.descriptor, &resolved).unwrap().unwrap();
/// let a: serde_json::Value = serde_json::from_slice(body).unwrap();
/// let b: serde_json::Value = serde_json::from_slice(&again).unwrap();
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone)]
pub struct JsonStrategy {
    id_field: String,
    relationships: BTreeMap<String, String>,
}

impl Default for JsonStrategy {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            relationships: BTreeMap::new(),
        }
    }
}

impl JsonStrategy {
    /// Creates a strategy keyed by `"id"` with no relationships.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the id field.
    #[must_use]
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Extracts `field` into records of `resource_type`.
    #[must_use]
    pub fn with_relationship(
        mut self,
        field: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        self.relationships.insert(field.into(), resource_type.into());
        self
    }

    /// Returns the id field.
    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Shreds one object of `resource_type`, pushing extracted records into
    /// `embedded`.
    pub(crate) fn shred_object(
        &self,
        object: &Map<String, Value>,
        resource_type: &str,
        embedded: &mut Vec<ShreddedResource>,
    ) -> ShredResult<ShreddedResource> {
        let id = object
            .get(&self.id_field)
            .and_then(id_string)
            .ok_or_else(|| ShredError::MissingId {
                resource_type: resource_type.to_string(),
                field: self.id_field.clone(),
            })?;

        let mut attributes = Map::new();
        let mut relationships = BTreeMap::new();
        for (field, value) in object {
            let Some(target) = self.relationships.get(field) else {
                attributes.insert(field.clone(), value.clone());
                continue;
            };
            match self.extract(value, target, embedded)? {
                Some(relationship) => {
                    relationships.insert(field.clone(), relationship);
                }
                None => {
                    attributes.insert(field.clone(), value.clone());
                }
            }
        }

        Ok(ShreddedResource {
            resource_type: resource_type.to_string(),
            id,
            attributes,
            relationships,
        })
    }

    fn extract(
        &self,
        value: &Value,
        resource_type: &str,
        embedded: &mut Vec<ShreddedResource>,
    ) -> ShredResult<Option<Relationship>> {
        match value {
            Value::Object(object) if self.has_id(object) => {
                let resource = self.shred_object(object, resource_type, embedded)?;
                let reference = resource.reference();
                embedded.push(resource);
                Ok(Some(Relationship::One(reference)))
            }
            Value::Array(items)
                if !items.is_empty()
                    && items
                        .iter()
                        .all(|v| v.as_object().is_some_and(|o| self.has_id(o))) =>
            {
                let mut refs = Vec::with_capacity(items.len());
                for item in items.iter().filter_map(Value::as_object) {
                    let resource = self.shred_object(item, resource_type, embedded)?;
                    refs.push(resource.reference());
                    embedded.push(resource);
                }
                Ok(Some(Relationship::Many(refs)))
            }
            _ => Ok(None),
        }
    }

    fn has_id(&self, object: &Map<String, Value>) -> bool {
        object.get(&self.id_field).and_then(id_string).is_some()
    }

    /// Shreds a top-level array of objects.
    pub(crate) fn shred_array(
        &self,
        items: &[Value],
        resource_type: &str,
        embedded: &mut Vec<ShreddedResource>,
    ) -> ShredResult<Vec<ShreddedResource>> {
        items
            .iter()
            .map(|item| match item {
                Value::Object(object) => self.shred_object(object, resource_type, embedded),
                other => Err(ShredError::UnexpectedShape(format!(
                    "collection element is {}, expected an object",
                    kind_of(other)
                ))),
            })
            .collect()
    }

    /// Reassembles a single record with its relationships embedded.
    ///
    /// Returns `None` if the record or any record it references is missing.
    pub(crate) fn embed(
        &self,
        reference: &ResourceRef,
        resolved: &Resolved,
        depth: usize,
    ) -> Option<Value> {
        let resource = resolved.get(reference)?;
        let mut object = resource.attributes.clone();
        if depth >= MAX_EMBED_DEPTH {
            return Some(Value::Object(object));
        }
        for (field, relationship) in &resource.relationships {
            let value = match relationship {
                Relationship::One(r) => self.embed(r, resolved, depth + 1)?,
                Relationship::Many(rs) => Value::Array(
                    rs.iter()
                        .map(|r| self.embed(r, resolved, depth + 1))
                        .collect::<Option<Vec<_>>>()?,
                ),
            };
            object.insert(field.clone(), value);
        }
        Some(Value::Object(object))
    }

    /// Reassembles top-level records, applying field projection.
    pub(crate) fn assemble(
        &self,
        references: &[ResourceRef],
        fields: Option<&[String]>,
        resolved: &Resolved,
    ) -> Option<Vec<Value>> {
        references
            .iter()
            .map(|r| self.embed(r, resolved, 0).map(|v| project(v, fields)))
            .collect()
    }
}

impl ShreddingStrategy for JsonStrategy {
    fn name(&self) -> &str {
        JSON_STRATEGY
    }

    fn supports_query(&self) -> bool {
        true
    }

    fn shred(&self, body: &[u8], request: &RequestDescriptor) -> ShredResult<Shredded> {
        if request.resource_type.is_empty() {
            return Err(ShredError::UnexpectedShape(
                "request descriptor has no resource type".into(),
            ));
        }
        let value: Value = serde_json::from_slice(body)?;
        let mut embedded = Vec::new();

        let (resources, layout) = match &value {
            Value::Object(object) => {
                let resource = self.shred_object(object, &request.resource_type, &mut embedded)?;
                let layout = Layout::Single {
                    resource: resource.reference(),
                };
                (vec![resource], layout)
            }
            Value::Array(items) => {
                let resources = self.shred_array(items, &request.resource_type, &mut embedded)?;
                let layout = Layout::Collection {
                    resources: resources.iter().map(ShreddedResource::reference).collect(),
                };
                (resources, layout)
            }
            other => {
                return Err(ShredError::UnexpectedShape(format!(
                    "body is {}, expected an object or array",
                    kind_of(other)
                )))
            }
        };

        let shredded = Shredded {
            resources,
            embedded,
            partial: request.is_partial(),
            blob: None,
            descriptor: QueryDescriptor {
                strategy: self.name().to_string(),
                layout,
                fields: request.fields.clone(),
            },
        };
        shredded.check_copies()?;
        Ok(shredded)
    }

    fn unshred(&self, query: &QueryDescriptor, resolved: &Resolved) -> ShredResult<Option<Vec<u8>>> {
        let fields = query.fields.as_deref();
        let value = match &query.layout {
            Layout::Single { resource } => {
                let Some(mut values) = self.assemble(std::slice::from_ref(resource), fields, resolved)
                else {
                    return Ok(None);
                };
                values.pop().unwrap_or(Value::Null)
            }
            Layout::Collection { resources } => match self.assemble(resources, fields, resolved) {
                Some(values) => Value::Array(values),
                None => return Ok(None),
            },
            Layout::Envelope { .. } | Layout::Blob { .. } => {
                return Err(ShredError::UnexpectedShape(format!(
                    "{} strategy cannot reassemble this layout",
                    self.name()
                )))
            }
        };
        Ok(Some(serde_json::to_vec(&value)?))
    }
}

/// Keeps only the requested fields of an object.
pub(crate) fn project(value: Value, fields: Option<&[String]>) -> Value {
    match (value, fields) {
        (Value::Object(object), Some(fields)) => Value::Object(
            object
                .into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect(),
        ),
        (value, _) => value,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
