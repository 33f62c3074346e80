//! An in-memory REST remote.

use async_trait::async_trait;
use offgrid_protocol::{
    url_path, Method, Network, NetworkError, Request, Response, DEFAULT_OVERWRITE_HEADER,
    ETAG_HEADER, IF_MATCH_HEADER, OPERATION_ID_HEADER,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct Stored {
    version: u64,
    body: Value,
}

#[derive(Debug, Default)]
struct ServerState {
    resources: BTreeMap<String, Stored>,
    collections: BTreeSet<String>,
    replies: HashMap<String, Response>,
    writes: Vec<(Method, String)>,
    next_id: u64,
}

/// A REST remote holding JSON resources by path.
///
/// - `GET /c/1` returns the resource with an `ETag` of its version;
///   `GET /c` lists the members of a collection
/// - `POST /c` creates `/c/<id>`, taking `id` from the body or assigning one
/// - `PUT` replaces (or creates), `PATCH` merges fields, `DELETE` removes
/// - A write with an `If-Match` that differs from the current ETag gets
///   `409` with the current body, unless it carries the overwrite header
/// - A write repeating an operation id gets the original reply and is not
///   applied again
#[derive(Debug, Default)]
pub struct MockServer {
    state: Mutex<ServerState>,
}

impl MockServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a resource at `path` as if another client wrote it, bumping
    /// its version.
    pub fn put_remote(&self, path: &str, body: Value) {
        let mut state = self.state.lock();
        let path = url_path(path);
        register_parent(&mut state, &path);
        let version = state.resources.get(&path).map_or(1, |s| s.version + 1);
        state.resources.insert(path, Stored { version, body });
    }

    /// Returns the resource at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.state
            .lock()
            .resources
            .get(&url_path(path))
            .map(|s| s.body.clone())
    }

    /// Returns the version of the resource at `path`.
    pub fn version(&self, path: &str) -> Option<u64> {
        self.state
            .lock()
            .resources
            .get(&url_path(path))
            .map(|s| s.version)
    }

    /// Returns the ETag of the resource at `path`.
    pub fn etag(&self, path: &str) -> Option<String> {
        self.version(path).map(etag)
    }

    /// Returns applied writes in order.
    pub fn writes(&self) -> Vec<(Method, String)> {
        self.state.lock().writes.clone()
    }

    /// Handles one request.
    pub fn handle(&self, request: &Request) -> Response {
        let mut state = self.state.lock();
        let operation_id = request
            .header(OPERATION_ID_HEADER)
            .filter(|_| request.method.is_mutating())
            .map(str::to_string);
        if let Some(reply) = operation_id.as_ref().and_then(|id| state.replies.get(id)) {
            return reply.clone();
        }

        let path = url_path(&request.url);
        let response = match request.method {
            Method::Get | Method::Head | Method::Options => read(&state, &path),
            Method::Post => create(&mut state, &path, request),
            Method::Put => replace(&mut state, &path, request),
            Method::Patch => merge(&mut state, &path, request),
            Method::Delete => remove(&mut state, &path, request),
        };

        if request.method.is_mutating() && response.is_success() {
            state.writes.push((request.method, path));
            if let Some(id) = operation_id {
                state.replies.insert(id, response.clone());
            }
        }
        response
    }
}

#[async_trait]
impl Network for MockServer {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        Ok(self.handle(request))
    }
}

fn etag(version: u64) -> String {
    format!("\"{version}\"")
}

fn found(stored: &Stored, status: u16) -> Response {
    Response::new(status)
        .with_json(&stored.body)
        .with_header(ETAG_HEADER, etag(stored.version))
}

fn register_parent(state: &mut ServerState, path: &str) {
    if let Some((parent, _)) = path.rsplit_once('/') {
        if !parent.is_empty() {
            state.collections.insert(parent.to_string());
        }
    }
}

fn read(state: &ServerState, path: &str) -> Response {
    if let Some(stored) = state.resources.get(path) {
        return found(stored, 200);
    }
    if !state.collections.contains(path) {
        return Response::new(404);
    }
    let prefix = format!("{path}/");
    let members: Vec<Value> = state
        .resources
        .iter()
        .filter(|(p, _)| p.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
        .map(|(_, s)| s.body.clone())
        .collect();
    Response::json_ok(&Value::Array(members))
}

/// Returns a 409 response if the request's `If-Match` is stale.
fn precondition(stored: Option<&Stored>, request: &Request) -> Option<Response> {
    if request.header(DEFAULT_OVERWRITE_HEADER).is_some() {
        return None;
    }
    let expected = request.header(IF_MATCH_HEADER)?;
    match stored {
        Some(stored) if etag(stored.version) != expected => Some(found(stored, 409)),
        None => Some(Response::new(412)),
        _ => None,
    }
}

fn body(request: &Request) -> Result<Value, Response> {
    request
        .json()
        .map_err(|e| Response::new(400).with_json(&json!({"error": e.to_string()})))
}

fn create(state: &mut ServerState, path: &str, request: &Request) -> Response {
    let mut value = match body(request) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let id = match value.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            state.next_id += 1;
            let id = state.next_id;
            if let Value::Object(object) = &mut value {
                object.insert("id".into(), json!(id));
            }
            id.to_string()
        }
    };
    let member = format!("{}/{id}", path.trim_end_matches('/'));
    if state.resources.contains_key(&member) {
        return Response::new(409);
    }
    state.collections.insert(path.to_string());
    let stored = Stored {
        version: 1,
        body: value,
    };
    let response = found(&stored, 201);
    state.resources.insert(member, stored);
    response
}

fn replace(state: &mut ServerState, path: &str, request: &Request) -> Response {
    if let Some(conflict) = precondition(state.resources.get(path), request) {
        return conflict;
    }
    let value = match body(request) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let (version, status) = match state.resources.get(path) {
        Some(stored) => (stored.version + 1, 200),
        None => (1, 201),
    };
    register_parent(state, path);
    let stored = Stored {
        version,
        body: value,
    };
    let response = found(&stored, status);
    state.resources.insert(path.to_string(), stored);
    response
}

fn merge(state: &mut ServerState, path: &str, request: &Request) -> Response {
    if let Some(conflict) = precondition(state.resources.get(path), request) {
        return conflict;
    }
    let patch = match body(request) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let Some(stored) = state.resources.get_mut(path) else {
        return Response::new(404);
    };
    match (&mut stored.body, patch) {
        (Value::Object(current), Value::Object(fields)) => current.extend(fields),
        (current, patch) => *current = patch,
    }
    stored.version += 1;
    found(stored, 200)
}

fn remove(state: &mut ServerState, path: &str, request: &Request) -> Response {
    if let Some(conflict) = precondition(state.resources.get(path), request) {
        return conflict;
    }
    match state.resources.remove(path) {
        Some(_) => Response::new(204),
        None => Response::new(404),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_round_trip() {
        let server = MockServer::new();
        let created = server.handle(&Request::post("/users").with_json(&json!({"name": "Ann"})));
        assert_eq!(created.status, 201);
        assert_eq!(created.json().unwrap()["id"], json!(1));

        let updated = server.handle(&Request::patch("/users/1").with_json(&json!({"age": 3})));
        assert_eq!(updated.json().unwrap(), json!({"id": 1, "name": "Ann", "age": 3}));
        assert_eq!(server.version("/users/1"), Some(2));

        let list = server.handle(&Request::get("/users"));
        assert_eq!(list.json().unwrap().as_array().map(Vec::len), Some(1));

        assert_eq!(server.handle(&Request::delete("/users/1")).status, 204);
        assert_eq!(server.handle(&Request::get("/users/1")).status, 404);
        assert_eq!(server.handle(&Request::get("/users")).json().unwrap(), json!([]));
    }

    #[test]
    fn stale_if_match_conflicts() {
        let server = MockServer::new();
        server.put_remote("/notes/1", json!({"text": "a"}));
        let stale = server.etag("/notes/1").unwrap();
        server.put_remote("/notes/1", json!({"text": "b"}));

        let write = Request::put("/notes/1")
            .with_header(IF_MATCH_HEADER, stale)
            .with_json(&json!({"text": "mine"}));
        let response = server.handle(&write);
        assert_eq!(response.status, 409);
        assert_eq!(response.json().unwrap(), json!({"text": "b"}));

        let forced = write.with_header(DEFAULT_OVERWRITE_HEADER, "true");
        assert_eq!(server.handle(&forced).status, 200);
        assert_eq!(server.get("/notes/1"), Some(json!({"text": "mine"})));
    }

    #[test]
    fn replayed_operation_is_applied_once() {
        let server = MockServer::new();
        let request = Request::post("/items")
            .with_header(OPERATION_ID_HEADER, "op-1")
            .with_json(&json!({"name": "x"}));
        let first = server.handle(&request);
        let second = server.handle(&request);
        assert_eq!(first, second);
        assert_eq!(server.writes().len(), 1);
    }
}
