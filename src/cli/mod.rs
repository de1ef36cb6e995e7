//! CLI command definitions.
//!
//! The `Cli` struct is the clap-derive entry point; handlers live in
//! `main.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Offline-first task store for field data collection
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage root (overrides config)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open both databases and report their schema state
    Migrate,

    /// Inspect and act on stored tasks
    Tasks(TasksArgs),

    /// Merge a server task list into the store
    Sync(SyncArgs),

    /// Inspect or prune the GPS trail
    Trace(TraceArgs),
}

#[derive(clap::Args, Debug)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub action: TasksAction,
}

#[derive(Subcommand, Debug)]
pub enum TasksAction {
    /// List stored instances
    List {
        /// Include tombstoned rows
        #[arg(long)]
        all: bool,
    },
    /// Accept a new task
    Accept { id: i64 },
    /// Reject a task
    Reject {
        id: i64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Cancel an accepted task
    Cancel { id: i64 },
    /// Complete an accepted task (repeating tasks spawn a fresh duplicate)
    Complete { id: i64 },
    /// Tombstone an instance, or remove it entirely with --hard
    Delete {
        id: i64,
        #[arg(long)]
        hard: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// JSON file holding the server's task list
    pub tasks_file: PathBuf,

    /// Source identity (defaults to the configured server host)
    #[arg(short, long)]
    pub source: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct TraceArgs {
    #[command(subcommand)]
    pub action: TraceAction,
}

#[derive(Subcommand, Debug)]
pub enum TraceAction {
    /// List recorded points for a source
    List {
        source: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Newest first
        #[arg(long)]
        desc: bool,
    },
    /// Record one point (for testing a deployment)
    Record {
        source: String,
        lat: f64,
        lon: f64,
    },
    /// Delete points for a source, optionally only up to a row id checkpoint
    Prune {
        source: String,
        #[arg(long)]
        up_to: Option<i64>,
    },
    /// Drop the whole trail for every source
    Reset,
}
