//! Purge command implementation.

use super::{open_root, CommandResult};
use offgrid_storage::StoreOptions;
use std::io::Write;
use std::path::Path;

/// Deletes every version of `store` except `keep_version`. Returns the
/// number of records removed.
pub async fn purge(root: &Path, store: &str, keep_version: &str) -> CommandResult<usize> {
    let (manager, _) = open_root(root)?;
    let options = StoreOptions::default().with_version(keep_version);
    manager.open_store(store, &options).await?;
    let removed = manager.purge_stale_versions(store).await?;
    manager.shutdown().await?;
    Ok(removed)
}

/// Runs the purge command.
pub async fn run(
    root: &Path,
    store: &str,
    keep_version: &str,
    out: &mut impl Write,
) -> CommandResult {
    let removed = purge(root, store, keep_version).await?;
    writeln!(
        out,
        "Purged {removed} record(s) of {store} outside version {keep_version}"
    )?;
    Ok(())
}
