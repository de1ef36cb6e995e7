use anyhow::{Context, Result, bail};
use clap::Parser;
use fieldtask::cli::{Cli, Command, SyncArgs, TasksAction, TasksArgs, TraceAction, TraceArgs};
use fieldtask::config::Config;
use fieldtask::db::{InstanceStore, TraceStore, now_ms};
use fieldtask::error::TransportError;
use fieldtask::status::TaskStatus;
use fieldtask::sync::{SyncEngine, TaskListClient};
use fieldtask::types::{Instance, TaskRecord};
use std::path::{Path, PathBuf};
use tracing::info;

/// Task-list client reading a JSON file, for deployments where the
/// assignment list is delivered out of band (or for testing one).
struct FileTaskListClient {
    path: PathBuf,
}

impl TaskListClient for FileTaskListClient {
    fn fetch_tasks(&self) -> std::result::Result<Vec<TaskRecord>, TransportError> {
        let data = std::fs::read_to_string(&self.path)
            .map_err(|e| TransportError::Network(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&data).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    fieldtask::logging::init(cli.verbose, &cli.log)?;

    let config = Config::load(cli.config.as_deref())?;
    let root = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data_dir.clone());

    match cli.command {
        Command::Migrate => migrate(&root),
        Command::Tasks(args) => tasks(&root, args),
        Command::Sync(args) => sync(&root, &config, args),
        Command::Trace(args) => trace(&root, args),
    }
}

fn migrate(root: &Path) -> Result<()> {
    let (_, instances) = InstanceStore::open(root)?;
    let (_, trail) = TraceStore::open(root)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "instances": instances,
            "trace": trail,
        }))?
    );
    Ok(())
}

fn tasks(root: &Path, args: TasksArgs) -> Result<()> {
    let (store, _) = InstanceStore::open(root)?;
    match args.action {
        TasksAction::List { all } => {
            let rows = if all {
                store.list_all()?
            } else {
                store.list_not_deleted()?
            };
            for row in &rows {
                print_row(row);
            }
            info!(count = rows.len(), "listed instances");
        }
        TasksAction::Accept { id } => {
            print_row(&store.set_task_status(id, TaskStatus::Accepted, None)?);
        }
        TasksAction::Reject { id, comment } => {
            print_row(&store.set_task_status(id, TaskStatus::Rejected, comment.as_deref())?);
        }
        TasksAction::Cancel { id } => {
            print_row(&store.set_task_status(id, TaskStatus::Cancelled, None)?);
        }
        TasksAction::Complete { id } => {
            let (done, duplicate) = store.complete_task(id)?;
            print_row(&done);
            if let Some(duplicate) = duplicate {
                print_row(&duplicate);
            }
        }
        TasksAction::Delete { id, hard } => {
            if hard {
                store.delete(id)?;
                println!("deleted {id}");
            } else {
                print_row(&store.delete_with_logging(id)?);
            }
        }
    }
    Ok(())
}

fn sync(root: &Path, config: &Config, args: SyncArgs) -> Result<()> {
    let source = args
        .source
        .or_else(|| config.source())
        .context("no source given and no server configured")?;

    let (store, _) = InstanceStore::open(root)?;
    let engine = SyncEngine::new(store);
    let client = FileTaskListClient {
        path: args.tasks_file,
    };

    let outcome = engine.sync(&source, &client, true)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    for (key, message) in outcome.user_visible_errors() {
        eprintln!("{key}: {message}");
    }
    if !outcome.is_success() {
        bail!("sync finished with errors");
    }
    Ok(())
}

fn trace(root: &Path, args: TraceArgs) -> Result<()> {
    let (store, _) = TraceStore::open(root)?;
    match args.action {
        TraceAction::List {
            source,
            limit,
            desc,
        } => {
            for point in store.points(&source, limit, desc)? {
                println!(
                    "{}\t{}\t{:.6}\t{:.6}",
                    point.id, point.time, point.lat, point.lon
                );
            }
        }
        TraceAction::Record { source, lat, lon } => {
            let id = store.insert_point(&source, lat, lon, now_ms())?;
            println!("recorded point {id}");
        }
        TraceAction::Prune { source, up_to } => {
            let deleted = store.delete_points(&source, up_to)?;
            println!("pruned {deleted} points");
        }
        TraceAction::Reset => {
            store.reset()?;
            println!("trace trail reset");
        }
    }
    Ok(())
}

fn print_row(row: &Instance) {
    println!(
        "{}\t{}\t{}\t{}{}",
        row.id.unwrap_or_default(),
        row.status.map(|s| s.as_str()).unwrap_or("-"),
        row.task_status.map(|s| s.as_str()).unwrap_or("-"),
        row.display_name,
        if row.is_deleted() { "\t[deleted]" } else { "" },
    );
}
