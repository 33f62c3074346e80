//! CLI command implementations.

pub mod inspect;
pub mod purge;
pub mod sync_log;

use offgrid_storage::{FileFactory, StoreManager, FILE_BACKEND};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Result type shared by commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Locks `root` and returns a manager whose default backend is a file store
/// on it, together with the factory.
pub fn open_root(root: &Path) -> CommandResult<(StoreManager, Arc<FileFactory>)> {
    if !root.is_dir() {
        return Err(format!("No store root found at {}", root.display()).into());
    }
    let factory = Arc::new(FileFactory::open(root)?);
    let manager = StoreManager::new();
    manager.register_factory(FILE_BACKEND, factory.clone())?;
    debug!(root = %root.display(), "opened store root");
    Ok((manager, factory))
}
