//! HTTP-shaped request and response values.
//!
//! These are plain data: nothing here performs I/O. Header names are stored
//! lower-cased so lookups are case-insensitive.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Header carrying the client operation id of a replayed write.
pub const OPERATION_ID_HEADER: &str = "x-offgrid-operation-id";

/// Header set on optimistic responses, carrying the queue sequence.
pub const QUEUED_HEADER: &str = "x-offgrid-queued";

/// Header asking the remote to overwrite regardless of version.
pub const DEFAULT_OVERWRITE_HEADER: &str = "x-offgrid-overwrite";

/// Conditional write header.
pub const IF_MATCH_HEADER: &str = "if-match";

/// Entity tag header.
pub const ETAG_HEADER: &str = "etag";

/// Content type header.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Base used to resolve relative URLs such as `/users/1`.
const RELATIVE_BASE: &str = "http://offgrid.invalid";

/// Request and response headers, keyed by lower-cased name.
pub type Headers = BTreeMap<String, String>;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns true for verbs that change server state.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Method::Post | Method::Put | Method::Patch | Method::Delete
        )
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ProtocolError::UnknownMethod(s.to_string())),
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Method.
    pub method: Method,
    /// Absolute or root-relative URL.
    pub url: String,
    /// Headers, lower-cased names.
    #[serde(default)]
    pub headers: Headers,
    /// Body, if any.
    #[serde(default)]
    pub body: Option<Bytes>,
}

impl Request {
    /// Creates a request without headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Creates a PUT request.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    /// Creates a PATCH request.
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::Patch, url)
    }

    /// Creates a DELETE request.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Sets a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets a raw body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body and content type.
    #[must_use]
    pub fn with_json(self, value: &Value) -> Self {
        self.with_header(CONTENT_TYPE_HEADER, "application/json")
            .with_body(value.to_string())
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Removes a header, returning its value.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if there is no body or it is not JSON.
    pub fn json(&self) -> ProtocolResult<Value> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| ProtocolError::Json("request has no body".into()))?;
        Ok(serde_json::from_slice(body)?)
    }

    /// Returns the URL path, used for endpoint matching.
    #[must_use]
    pub fn path(&self) -> String {
        url_path(&self.url)
    }
}

/// A response from the network or synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Headers, lower-cased names.
    #[serde(default)]
    pub headers: Headers,
    /// Body.
    #[serde(default)]
    pub body: Bytes,
}

impl Response {
    /// Creates a response with an empty body.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a 200 response with a JSON body.
    #[must_use]
    pub fn json_ok(value: &Value) -> Self {
        Self::new(200).with_json(value)
    }

    /// Sets a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body and content type.
    #[must_use]
    pub fn with_json(self, value: &Value) -> Self {
        self.with_header(CONTENT_TYPE_HEADER, "application/json")
            .with_body(value.to_string())
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for 5xx statuses.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the body is not JSON.
    pub fn json(&self) -> ProtocolResult<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Parses a URL, resolving root-relative URLs against a placeholder base.
///
/// Returns the parsed URL and whether the input was relative.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUrl`] if the input cannot be parsed.
pub fn parse_url(raw: &str) -> ProtocolResult<(Url, bool)> {
    match Url::parse(raw) {
        Ok(url) => Ok((url, false)),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(RELATIVE_BASE)
                .map_err(|e| ProtocolError::InvalidUrl(e.to_string()))?;
            let url = base
                .join(raw)
                .map_err(|_| ProtocolError::InvalidUrl(raw.to_string()))?;
            Ok((url, true))
        }
        Err(_) => Err(ProtocolError::InvalidUrl(raw.to_string())),
    }
}

/// Returns the path component of a URL without trailing slash.
///
/// Unparseable input is returned up to its query string, so callers always
/// get something usable for prefix matching.
#[must_use]
pub fn url_path(raw: &str) -> String {
    let path = match parse_url(raw) {
        Ok((url, _)) => url.path().to_string(),
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    };
    match path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Returns true if `path` equals `prefix` or lies below it segment-wise
/// (`/users` covers `/users/42` but not `/users2`). `/` covers everything.
#[must_use]
pub fn path_has_prefix(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Returns true if one path equals the other or is a segment-wise prefix of
/// it (`/users` and `/users/42` are related, `/users` and `/users2` are not).
#[must_use]
pub fn paths_related(a: &str, b: &str) -> bool {
    path_has_prefix(a, b) || path_has_prefix(b, a)
}
