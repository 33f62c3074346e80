//! offgrid CLI
//!
//! Command-line tools for file-backed offgrid store roots.
//!
//! # Commands
//!
//! - `inspect` - List stores, versions and record counts
//! - `dump-sync-log` - Print queued writes and their status
//! - `purge` - Delete every version of a store but one
//! - `retry-failed` - Reset failed sync log entries to pending

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use offgrid_sync::SYNC_LOG_STORE;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offgrid store maintenance tools.
#[derive(Parser)]
#[command(name = "offgrid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store root directory
    #[arg(global = true, short, long)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List stores, versions and record counts
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print the sync log
    DumpSyncLog {
        /// Sync log store name
        #[arg(short, long, default_value = SYNC_LOG_STORE)]
        store: String,

        /// Sync log store version
        #[arg(long, default_value = "0")]
        store_version: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Delete every version of a store except one
    Purge {
        /// Store name
        #[arg(short, long)]
        store: String,

        /// Version to keep
        #[arg(short, long)]
        keep_version: String,
    },

    /// Reset failed sync log entries to pending
    RetryFailed {
        /// Sync log store name
        #[arg(short, long, default_value = SYNC_LOG_STORE)]
        store: String,

        /// Sync log store version
        #[arg(long, default_value = "0")]
        store_version: String,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut out = std::io::stdout().lock();
    match cli.command {
        Commands::Inspect { format } => {
            let root = cli.root.ok_or("Store root required for inspect")?;
            commands::inspect::run(&root, format, &mut out).await?;
        }
        Commands::DumpSyncLog {
            store,
            store_version,
            format,
        } => {
            let root = cli.root.ok_or("Store root required for dump-sync-log")?;
            commands::sync_log::dump(&root, &store, &store_version, format, &mut out).await?;
        }
        Commands::Purge {
            store,
            keep_version,
        } => {
            let root = cli.root.ok_or("Store root required for purge")?;
            commands::purge::run(&root, &store, &keep_version, &mut out).await?;
        }
        Commands::RetryFailed {
            store,
            store_version,
        } => {
            let root = cli.root.ok_or("Store root required for retry-failed")?;
            commands::sync_log::retry_failed(&root, &store, &store_version, &mut out).await?;
        }
        Commands::Version => {
            writeln!(out, "offgrid CLI v{}", env!("CARGO_PKG_VERSION"))?;
        }
    }

    Ok(())
}
