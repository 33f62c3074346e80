//! # offgrid Shred
//!
//! Decomposes fetched payloads into normalized resource records and
//! reassembles responses from them.
//!
//! ## Strategies
//!
//! - [`JsonStrategy`] - an object or array of objects keyed by an id field,
//!   with optional relationship extraction
//! - [`RestStrategy`] - collection envelopes (`items` plus links/paging)
//! - [`BinaryStrategy`] - opaque blobs keyed by URL
//!
//! Strategies are pure and synchronous; [`ShreddingPipeline`] stores their
//! output in a [`KeyValueStore`](offgrid_storage::KeyValueStore) and loads
//! records back for reassembly.
//!
//! ## Round-trip law
//!
//! For a full-record request, reassembling the records produced by
//! shredding a payload yields a payload semantically equal to the original.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binary;
mod error;
mod json;
mod pipeline;
mod resource;
mod rest;
mod strategy;

pub use binary::{BinaryStrategy, BINARY_STRATEGY};
pub use error::{ShredError, ShredResult};
pub use json::{JsonStrategy, JSON_STRATEGY};
pub use pipeline::{load_resource, ShreddingPipeline};
pub use resource::{
    Layout, QueryDescriptor, Relationship, RequestDescriptor, ResourceRef, Shredded,
    ShreddedResource, BLOB_PREFIX,
};
pub use rest::{RestStrategy, REST_STRATEGY};
pub use strategy::{Resolved, ShreddingStrategy};
