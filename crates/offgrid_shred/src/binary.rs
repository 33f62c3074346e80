//! Binary strategy: opaque blobs keyed by URL.

use crate::error::{ShredError, ShredResult};
use crate::resource::{Layout, QueryDescriptor, RequestDescriptor, Shredded, BLOB_PREFIX};
use crate::strategy::{Resolved, ShreddingStrategy};
use offgrid_protocol::normalize_url;

/// Name of [`BinaryStrategy`].
pub const BINARY_STRATEGY: &str = "binary";

/// Stores the body as one blob under `blob/<normalized url>`. No
/// decomposition, no queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryStrategy;

impl BinaryStrategy {
    /// Returns the blob key for a URL.
    #[must_use]
    pub fn blob_key(url: &str) -> String {
        format!("{BLOB_PREFIX}{}", normalize_url(url))
    }
}

impl ShreddingStrategy for BinaryStrategy {
    fn name(&self) -> &str {
        BINARY_STRATEGY
    }

    fn supports_query(&self) -> bool {
        false
    }

    fn shred(&self, body: &[u8], request: &RequestDescriptor) -> ShredResult<Shredded> {
        Ok(Shredded {
            resources: Vec::new(),
            embedded: Vec::new(),
            partial: false,
            blob: Some(body.to_vec()),
            descriptor: QueryDescriptor {
                strategy: self.name().to_string(),
                layout: Layout::Blob {
                    key: Self::blob_key(&request.url),
                },
                fields: None,
            },
        })
    }

    fn unshred(&self, query: &QueryDescriptor, resolved: &Resolved) -> ShredResult<Option<Vec<u8>>> {
        match &query.layout {
            Layout::Blob { .. } => Ok(resolved.blob().map(<[u8]>::to_vec)),
            _ => Err(ShredError::UnexpectedShape(
                "binary strategy only reassembles blobs".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let body = [0u8, 159, 146, 150];
        let shredded = BinaryStrategy
            .shred(&body, &RequestDescriptor::new("/img/1.png?b=1&a=2", ""))
            .unwrap();
        assert!(shredded.resources.is_empty());
        assert_eq!(
            shredded.descriptor.layout,
            Layout::Blob {
                key: "blob//img/1.png?a=2&b=1".into()
            }
        );
        let out = BinaryStrategy
            .unshred(&shredded.descriptor, &Resolved::from_shredded(&shredded))
            .unwrap();
        assert_eq!(out.as_deref(), Some(&body[..]));
    }
}
