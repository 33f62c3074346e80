//! # offgrid Cache
//!
//! Fingerprint-keyed response cache for offline reads.
//!
//! A [`RequestCache`] stores responses as [`CacheEntry`] values, either raw
//! or shredded into resource records, and answers reads according to a
//! per-endpoint [`CacheStrategy`].
//!
//! ## Design Principles
//!
//! - **Lazy expiry**: expired entries read as absent but are not deleted on
//!   the read path
//! - **Explicit fallbacks**: the cache is only served instead of the network
//!   when the strategy says so or the network failed, and the
//!   [`CacheSource`] of every answer is reported
//! - **Cancellation is final**: a cancelled read never falls back to the cache
//!
//! ## Strategies
//!
//! - [`CacheStrategy::CacheFirst`] - fresh entries skip the network
//! - [`CacheStrategy::NetworkFirst`] - network, then cache on failure
//! - [`CacheStrategy::StaleWhileRevalidate`] - cache now, refresh behind
//! - [`CacheStrategy::NoCache`] - network only

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod entry;
mod error;
mod strategy;

pub use cache::{RequestCache, CACHE_STORE, RESOURCE_STORE};
pub use config::CacheConfig;
pub use entry::{CacheEntry, CacheTarget, CachedContent, RAW_STRATEGY};
pub use error::{CacheError, CacheResult};
pub use strategy::{CacheOutcome, CacheSource, CacheStrategy};
