//! # offgrid Fetch
//!
//! The request interceptor applications send every network call through.
//!
//! ## Routing
//!
//! ```text
//! read  ── online ──> RequestCache::fetch_with(strategy) ──> network / cache
//!       └─ offline ─> cached entry, stale entry, or cached records
//!
//! write ── online ──> network ── ok ──> invalidate related cache entries
//!       │                    └─ transport failure ─┐
//!       └─ offline ────────────────────────────────┴─> SyncManager::enqueue
//! ```
//!
//! Strategy, shredding and optimistic responses are chosen per endpoint by
//! longest path prefix ([`InterceptorConfig`]).
//!
//! ## Key Invariants
//!
//! - A write handed to the network is never also queued unless the network
//!   failed in transport
//! - A cancelled read does not fall back to the cache
//! - The interceptor never resolves conflicts

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod interceptor;

pub use config::{EndpointConfig, EndpointRule, InterceptorConfig};
pub use connectivity::Connectivity;
pub use error::{FetchError, FetchResult};
pub use interceptor::{FetchInterceptor, FetchOutcome, QUEUED_STATUS};
