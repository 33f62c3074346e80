//! A scriptable [`Network`] for tests.

use async_trait::async_trait;
use offgrid_protocol::{Network, NetworkError, Request, Response};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A mock network.
///
/// Each call is answered, in order of precedence, by:
/// 1. the offline switch (`Unreachable`)
/// 2. the next scripted result
/// 3. the backend (for example a [`crate::MockServer`])
/// 4. an empty `200`
///
/// Every request that reaches the network, offline or not, is recorded.
#[derive(Default)]
pub struct MockNetwork {
    offline: AtomicBool,
    scripted: Mutex<VecDeque<Result<Response, NetworkError>>>,
    backend: Option<Arc<dyn Network>>,
    latency: Mutex<Option<Duration>>,
    requests: Mutex<Vec<Request>>,
}

impl MockNetwork {
    /// Creates an online network answering `200` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an online network forwarding unscripted calls to `backend`.
    pub fn with_backend(backend: Arc<dyn Network>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::default()
        }
    }

    /// Switches the network off or on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns true if the network is switched off.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Delays every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Queues a response for a future call.
    pub fn push_response(&self, response: Response) {
        self.scripted.lock().push_back(Ok(response));
    }

    /// Queues a failure for a future call.
    pub fn push_error(&self, error: NetworkError) {
        self.scripted.lock().push_back(Err(error));
    }

    /// Queues `count` transport failures.
    pub fn fail_next(&self, count: usize) {
        let mut scripted = self.scripted.lock();
        for _ in 0..count {
            scripted.push_back(Err(NetworkError::Unreachable("scripted failure".into())));
        }
    }

    /// Returns every request seen so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Returns the URLs of requests seen so far.
    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.url.clone()).collect()
    }

    /// Returns the JSON bodies of requests seen so far; requests without a
    /// JSON body are skipped.
    pub fn json_bodies(&self) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| r.json().ok())
            .collect()
    }

    /// Returns the number of requests seen so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.requests.lock().push(request.clone());

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.is_offline() {
            return Err(NetworkError::Unreachable("mock network is offline".into()));
        }
        let scripted = self.scripted.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        match &self.backend {
            Some(backend) => backend.fetch(request).await,
            None => Ok(Response::new(200)),
        }
    }
}
