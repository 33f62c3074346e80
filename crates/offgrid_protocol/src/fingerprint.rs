//! Request fingerprints.
//!
//! A fingerprint is the SHA-256 of a canonical description of a request:
//!
//! ```text
//! METHOD \n normalized-url \n name:value (relevant headers, sorted) ... \n body-hash
//! ```
//!
//! The URL is normalized by sorting query parameters and dropping the
//! fragment, so `?b=2&a=1` and `?a=1&b=2` fingerprint the same. Bodies only
//! contribute for non-GET requests.

use crate::http::{parse_url, Method, Request};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A deterministic identifier for a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of `request`, including only the named
    /// headers (case-insensitive).
    #[must_use]
    pub fn of(request: &Request, relevant_headers: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_url(&request.url).as_bytes());
        hasher.update(b"\n");

        let mut names: Vec<String> = relevant_headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();
        for name in names {
            if let Some(value) = request.header(&name) {
                hasher.update(name.as_bytes());
                hasher.update(b":");
                hasher.update(value.as_bytes());
                hasher.update(b"\n");
            }
        }

        if request.method != Method::Get {
            if let Some(body) = &request.body {
                hasher.update(Sha256::digest(body));
            }
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Wraps an already computed fingerprint string.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix for logs.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a URL for fingerprinting.
///
/// Absolute URLs keep their scheme and host (lower-cased by the parser);
/// root-relative URLs stay relative. Unparseable input is returned as is.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let Ok((mut url, relative)) = parse_url(raw) else {
        return raw.to_string();
    };

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    url.set_fragment(None);
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    if relative {
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn query_order_is_irrelevant() {
        let a = Fingerprint::of(&Request::get("/users?b=2&a=1"), &[]);
        let b = Fingerprint::of(&Request::get("/users?a=1&b=2#top"), &[]);
        assert_eq!(a, b);
        assert_eq!(normalize_url("/users?b=2&a=1"), "/users?a=1&b=2");
        assert_eq!(
            normalize_url("HTTPS://Example.com/x?z=1&y=2"),
            "https://example.com/x?y=2&z=1"
        );
    }

    #[test]
    fn method_and_body_distinguish() {
        let get = Fingerprint::of(&Request::get("/users/1"), &[]);
        let delete = Fingerprint::of(&Request::delete("/users/1"), &[]);
        assert_ne!(get, delete);

        let bob = Request::put("/users/1").with_json(&json!({"name": "Bob"}));
        let carol = Request::put("/users/1").with_json(&json!({"name": "Carol"}));
        assert_ne!(Fingerprint::of(&bob, &[]), Fingerprint::of(&carol, &[]));
    }

    #[test]
    fn only_relevant_headers_count() {
        let plain = Request::get("/feed");
        let tagged = Request::get("/feed").with_header("Accept-Language", "fr");
        assert_eq!(Fingerprint::of(&plain, &[]), Fingerprint::of(&tagged, &[]));

        let relevant = headers(&["accept-language"]);
        assert_ne!(
            Fingerprint::of(&plain, &relevant),
            Fingerprint::of(&tagged, &relevant)
        );
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = Fingerprint::of(&Request::get("/"), &[]);
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(fp.short().len(), 12);
    }
}
