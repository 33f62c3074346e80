//! Inspect command implementation.

use super::{open_root, CommandResult};
use crate::Format;
use offgrid_storage::StoreOptions;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// One keyspace found under the root.
#[derive(Debug, Serialize)]
pub struct KeySpaceStats {
    /// Store name.
    pub name: String,
    /// Store version.
    pub version: String,
    /// Number of records.
    pub records: usize,
}

/// Root inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Root path.
    pub root: String,
    /// Keyspaces sorted by name, then version.
    pub keyspaces: Vec<KeySpaceStats>,
}

/// Runs the inspect command.
pub async fn run(root: &Path, format: Format, out: &mut impl Write) -> CommandResult {
    let result = inspect(root).await?;
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?,
        Format::Text => print_text_output(&result, out)?,
    }
    Ok(())
}

/// Counts the records of every keyspace under `root`.
pub async fn inspect(root: &Path) -> CommandResult<InspectResult> {
    let (manager, factory) = open_root(root)?;
    let mut keyspaces = Vec::new();

    for keyspace in factory.keyspaces()? {
        let options = StoreOptions::default().with_version(keyspace.version());
        let store = manager.open_store(keyspace.name(), &options).await?;
        let records = store.keys().await?.len();
        manager.close_store(keyspace.name()).await?;
        keyspaces.push(KeySpaceStats {
            name: keyspace.name().to_string(),
            version: keyspace.version().to_string(),
            records,
        });
    }

    Ok(InspectResult {
        root: root.display().to_string(),
        keyspaces,
    })
}

fn print_text_output(result: &InspectResult, out: &mut impl Write) -> CommandResult {
    writeln!(out, "Store root: {}", result.root)?;
    if result.keyspaces.is_empty() {
        writeln!(out, "  (no stores)")?;
        return Ok(());
    }
    writeln!(out, "  {:<32} {:<12} {:>8}", "STORE", "VERSION", "RECORDS")?;
    for keyspace in &result.keyspaces {
        writeln!(
            out,
            "  {:<32} {:<12} {:>8}",
            keyspace.name, keyspace.version, keyspace.records
        )?;
    }
    Ok(())
}
