//! Sync log commands.

use super::{open_root, CommandResult};
use crate::Format;
use offgrid_protocol::SyncLogEntry;
use offgrid_storage::StoreOptions;
use offgrid_sync::SyncLog;
use std::io::Write;
use std::path::Path;

async fn open_log(root: &Path, store: &str, version: &str) -> CommandResult<SyncLog> {
    let (manager, _) = open_root(root)?;
    let options = StoreOptions::default().with_version(version);
    let store = manager.open_store(store, &options).await?;
    Ok(SyncLog::open(store).await?)
}

/// Runs the dump-sync-log command.
///
/// Opening the log marks entries left `Submitting` by a crashed process as
/// interrupted, as any process opening it would.
pub async fn dump(
    root: &Path,
    store: &str,
    version: &str,
    format: Format,
    out: &mut impl Write,
) -> CommandResult {
    let entries = open_log(root, store, version).await?.entries().await?;
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?,
        Format::Text => print_text_output(&entries, out)?,
    }
    Ok(())
}

/// Runs the retry-failed command.
pub async fn retry_failed(
    root: &Path,
    store: &str,
    version: &str,
    out: &mut impl Write,
) -> CommandResult {
    let reset = open_log(root, store, version).await?.reset_failed().await?;
    let noun = if reset.len() == 1 { "entry" } else { "entries" };
    writeln!(out, "Reset {} failed {noun} to pending", reset.len())?;
    for entry in &reset {
        writeln!(out, "  #{} {} {}", entry.sequence, entry.method, entry.endpoint)?;
    }
    Ok(())
}

fn print_text_output(entries: &[SyncLogEntry], out: &mut impl Write) -> CommandResult {
    if entries.is_empty() {
        writeln!(out, "Sync log is empty")?;
        return Ok(());
    }
    for entry in entries {
        write!(
            out,
            "#{:<6} {:<10} {:<6} {} attempts={}",
            entry.sequence, entry.status, entry.method, entry.endpoint, entry.attempts
        )?;
        if let Some(failure) = &entry.failure {
            write!(out, " failure={failure:?}")?;
        }
        if let Some(error) = &entry.last_error {
            write!(out, " error=\"{error}\"")?;
        }
        if entry.conflict.as_ref().is_some_and(|c| !c.is_resolved()) {
            write!(out, " [unresolved conflict]")?;
        }
        writeln!(out)?;
    }
    Ok(())
}
