//! The strategy seam.

use crate::error::ShredResult;
use crate::resource::{QueryDescriptor, RequestDescriptor, ResourceRef, Shredded, ShreddedResource};
use std::collections::HashMap;

/// Decomposes response bodies into records and reassembles them.
///
/// Strategies are pure: they never touch a store. The
/// [`ShreddingPipeline`](crate::ShreddingPipeline) persists what `shred`
/// returns and loads what `unshred` needs into a [`Resolved`] set.
///
/// # Invariants
///
/// For every body `P` a strategy accepts, reassembling the records from
/// `shred(P)` with the returned descriptor yields a body semantically equal
/// to `P` (JSON object key order is irrelevant), provided the request asked
/// for the full record. Bodies that repeat a record with differing content
/// are rejected with [`ShredError::ConflictingCopies`](crate::ShredError::ConflictingCopies).
pub trait ShreddingStrategy: Send + Sync {
    /// Registered name, stored in cache entries.
    fn name(&self) -> &str;

    /// Returns true if single resources can be answered from records cached
    /// by other responses.
    fn supports_query(&self) -> bool;

    /// Splits `body` into records.
    ///
    /// # Errors
    ///
    /// Returns [`ShredError`](crate::ShredError) if the body does not fit
    /// the strategy; callers fall back to raw caching.
    fn shred(&self, body: &[u8], request: &RequestDescriptor) -> ShredResult<Shredded>;

    /// Reassembles a body.
    ///
    /// Returns `None` if a referenced record is missing.
    fn unshred(&self, query: &QueryDescriptor, resolved: &Resolved) -> ShredResult<Option<Vec<u8>>>;
}

/// Records loaded from a store for reassembly.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    resources: HashMap<String, ShreddedResource>,
    blob: Option<Vec<u8>>,
}

impl Resolved {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record.
    pub fn insert(&mut self, resource: ShreddedResource) {
        self.resources.insert(resource.key(), resource);
    }

    /// Sets the blob.
    pub fn set_blob(&mut self, blob: Vec<u8>) {
        self.blob = Some(blob);
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, reference: &ResourceRef) -> Option<&ShreddedResource> {
        self.resources.get(&reference.key())
    }

    /// Returns true if the record is present.
    #[must_use]
    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.resources.contains_key(&reference.key())
    }

    /// Returns the blob.
    #[must_use]
    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// Builds a set from the resources of a shredded payload, as if they
    /// had been stored and reloaded.
    #[must_use]
    pub fn from_shredded(shredded: &Shredded) -> Self {
        let mut resolved = Self::new();
        for resource in shredded.resources.iter().chain(&shredded.embedded) {
            match resolved.resources.get_mut(&resource.key()) {
                Some(existing) => existing.merge(resource.clone()),
                None => resolved.insert(resource.clone()),
            }
        }
        resolved.blob = shredded.blob.clone();
        resolved
    }
}
