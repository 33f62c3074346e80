//! # offgrid Testkit
//!
//! Test utilities for offgrid.
//!
//! This crate provides:
//! - [`MockNetwork`] - a scriptable network with an offline switch
//! - [`MockServer`] - an in-memory REST remote with ETag preconditions
//! - Fixtures for memory and file-backed store managers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offgrid_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replays_after_reconnect() {
//!     let server = Arc::new(MockServer::new());
//!     let network = Arc::new(MockNetwork::with_backend(server.clone()));
//!     network.set_offline(true);
//!     // ... enqueue, go online, sync
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod network;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::network::MockNetwork;
    pub use crate::server::MockServer;
    pub use std::sync::Arc;
}

pub use fixtures::*;
pub use generators::*;
pub use network::MockNetwork;
pub use server::MockServer;
