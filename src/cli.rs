//! The process-facing CLI surface from `spec.md` §6.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "osh", about = "Append-only shell history log: storage and query core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Newest-first NUL-delimited records for the interactive finder.
    Search {
        #[arg(long, value_enum, default_value = "all")]
        mode: SearchMode,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Newest-first human-readable `{timestamp} -- {command}` lines.
    List,
    /// Record one captured command.
    AppendEvent {
        #[arg(long)]
        starttime: f64,
        #[arg(long)]
        endtime: f64,
        #[arg(long)]
        command: String,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long = "exit-code")]
        exit_code: Option<i64>,
        #[arg(long)]
        machine: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Migrate sources to the canonical `.osh` format in place.
    Convert { paths: Vec<PathBuf> },
    /// Migrate pre-release `.osh_legacy` archives in place.
    ConvertOshLegacy { paths: Vec<PathBuf> },
    /// Migrate old JSON-lines `.osh` files in place.
    ConvertOldOsh { paths: Vec<PathBuf> },
    /// Verify per-file timestamp ordering.
    Check,
    /// Print aggregate statistics over the full merged history.
    Report,
}

#[derive(Clone, clap::ValueEnum)]
pub enum SearchMode {
    All,
    Session,
    Folder,
    Bag,
}
