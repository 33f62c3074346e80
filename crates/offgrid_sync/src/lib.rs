//! # offgrid Sync
//!
//! Durable queue of offline writes and its replay engine.
//!
//! This crate provides:
//! - [`SyncLog`] - sequence-ordered entries persisted in a key-value store
//! - [`SyncManager`] - enqueue, replay, retry and conflict resolution
//! - [`SyncEvent`] - queue depth, status and conflict notifications
//!
//! ## Entry lifecycle
//!
//! ```text
//! Pending -> Submitting -> Submitted
//!                     \-> Failed -> Pending (retry)
//! ```
//!
//! ## Key Invariants
//!
//! - An entry is persisted before `enqueue` returns
//! - Replay is sequential in sequence order, never parallel
//! - Writes are never de-duplicated; each enqueue is its own entry
//! - Only one replay runs at a time
//! - A submission in flight always completes; cancellation takes effect
//!   between entries

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod event;
mod log;
mod manager;

pub use config::{ConflictRule, FailurePolicy, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use event::{SyncEvent, SyncReport, SyncRunStatus};
pub use log::{entry_key, SyncLog, SYNC_LOG_STORE};
pub use manager::SyncManager;
