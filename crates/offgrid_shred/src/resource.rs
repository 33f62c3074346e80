//! Normalized resources and reassembly descriptors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::{ShredError, ShredResult};
use std::collections::{BTreeMap, HashMap};

/// Key prefix for blobs stored by the binary strategy.
pub const BLOB_PREFIX: &str = "blob/";

/// A reference to a normalized resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource type, e.g. `"user"`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource id, stringified.
    pub id: String,
}

impl ResourceRef {
    /// Creates a reference.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Returns the store key of the referenced record: `<type>/<id>`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// A relationship from one resource to others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "refs", rename_all = "snake_case")]
pub enum Relationship {
    /// An embedded object.
    One(ResourceRef),
    /// An embedded array of objects, in order.
    Many(Vec<ResourceRef>),
}

impl Relationship {
    /// Returns every referenced resource.
    #[must_use]
    pub fn refs(&self) -> Vec<&ResourceRef> {
        match self {
            Relationship::One(r) => vec![r],
            Relationship::Many(rs) => rs.iter().collect(),
        }
    }
}

/// One normalized record extracted from a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShreddedResource {
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource id, stringified.
    pub id: String,
    /// Scalar and non-extracted fields, including the id field.
    pub attributes: Map<String, Value>,
    /// Extracted embedded resources, by field name.
    #[serde(default)]
    pub relationships: BTreeMap<String, Relationship>,
}

impl ShreddedResource {
    /// Returns a reference to this resource.
    #[must_use]
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type.clone(), self.id.clone())
    }

    /// Returns the store key: `<type>/<id>`.
    #[must_use]
    pub fn key(&self) -> String {
        self.reference().key()
    }

    /// Merges `newer` into `self`: newer attributes and relationships win,
    /// fields only present here are kept.
    pub fn merge(&mut self, newer: ShreddedResource) {
        self.attributes.extend(newer.attributes);
        self.relationships.extend(newer.relationships);
    }
}

/// What a request asked for, as far as shredding is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Request URL.
    pub url: String,
    /// Resource type of the top-level records.
    pub resource_type: String,
    /// Requested resource id, for single-resource requests.
    #[serde(default)]
    pub id: Option<String>,
    /// Requested fields. `None` means the full record.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

impl RequestDescriptor {
    /// Creates a descriptor for a full-record request.
    pub fn new(url: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resource_type: resource_type.into(),
            id: None,
            fields: None,
        }
    }

    /// Targets a single resource id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Limits the response to `fields`.
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if only some fields were requested.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.fields.is_some()
    }
}

/// Shape of a shredded response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Layout {
    /// A single object.
    Single {
        /// The object.
        resource: ResourceRef,
    },
    /// A bare array of objects.
    Collection {
        /// Elements in order.
        resources: Vec<ResourceRef>,
    },
    /// An object wrapping an array of objects plus other fields (links,
    /// paging).
    Envelope {
        /// Field holding the array.
        collection_field: String,
        /// Elements in order.
        resources: Vec<ResourceRef>,
        /// Remaining top-level fields, kept verbatim.
        extras: Map<String, Value>,
    },
    /// An opaque blob.
    Blob {
        /// Store key of the blob.
        key: String,
    },
}

impl Layout {
    /// Returns the top-level resources.
    #[must_use]
    pub fn resources(&self) -> Vec<&ResourceRef> {
        match self {
            Layout::Single { resource } => vec![resource],
            Layout::Collection { resources } | Layout::Envelope { resources, .. } => {
                resources.iter().collect()
            }
            Layout::Blob { .. } => Vec::new(),
        }
    }
}

/// Everything needed to reassemble a response from stored records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Strategy that produced the layout.
    pub strategy: String,
    /// Response shape.
    pub layout: Layout,
    /// Requested fields, applied to top-level records on reassembly.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

/// Output of a shredding strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Shredded {
    /// Top-level records, in payload order.
    pub resources: Vec<ShreddedResource>,
    /// Records extracted from relationship fields. May repeat a record that
    /// several top-level records embed.
    pub embedded: Vec<ShreddedResource>,
    /// True if the request limited fields, so records are partial.
    pub partial: bool,
    /// Opaque blob to store under the layout key.
    pub blob: Option<Vec<u8>>,
    /// How to reassemble the response.
    pub descriptor: QueryDescriptor,
}

impl Shredded {
    /// Checks that every record appearing more than once, at top level or
    /// embedded, appears identically each time.
    ///
    /// # Errors
    ///
    /// Returns [`ShredError::ConflictingCopies`] naming the first record
    /// whose copies differ.
    pub fn check_copies(&self) -> ShredResult<()> {
        let mut seen: HashMap<String, &ShreddedResource> = HashMap::new();
        for resource in self.resources.iter().chain(&self.embedded) {
            match seen.get(&resource.key()) {
                Some(first) if *first != resource => {
                    return Err(ShredError::ConflictingCopies(resource.key()));
                }
                Some(_) => {}
                None => {
                    seen.insert(resource.key(), resource);
                }
            }
        }
        Ok(())
    }
}
