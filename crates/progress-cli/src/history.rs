use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::Args;
use progress_core::models::TaskSnapshot;
use progress_core::persistence::TaskHistoryStore;
use progress_core::sqlite::SqliteHistoryStore;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::CliResult;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// SQLite file the tracker archives into
    #[arg(long, env = "PROGRESS_HISTORY_DB")]
    db: PathBuf,

    /// Maximum number of rows, newest first
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Delete archived rows not updated within this many seconds first
    #[arg(long)]
    prune_older_than_secs: Option<u64>,

    /// Print one JSON object per row instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRow<'a> {
    task_id: &'a str,
    status: &'static str,
    stage: &'a str,
    percentage: f64,
    started: String,
    last_updated: String,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> HistoryRow<'a> {
    fn from_snapshot(task: &'a TaskSnapshot) -> CliResult<Self> {
        Ok(Self {
            task_id: task.task_id.as_str(),
            status: task.status.as_str(),
            stage: &task.stage,
            percentage: task.percentage,
            started: rfc3339(task.start_time)?,
            last_updated: rfc3339(task.last_updated)?,
            message: &task.message,
            error: task.error.as_deref(),
        })
    }
}

pub async fn execute(args: HistoryArgs) -> CliResult<()> {
    let store = open_history(args.db).await?;

    if let Some(seconds) = args.prune_older_than_secs {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(seconds))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let pruning = store.clone();
        let deleted = tokio::task::spawn_blocking(move || pruning.prune_archived(cutoff)).await??;
        tracing::info!(deleted, "pruned archived tasks");
    }

    let limit = args.limit;
    let tasks = tokio::task::spawn_blocking(move || store.list_recent(limit)).await??;
    if tasks.is_empty() && !args.json {
        println!("no archived tasks");
        return Ok(());
    }

    for task in &tasks {
        let row = HistoryRow::from_snapshot(task)?;
        if args.json {
            println!("{}", serde_json::to_string(&row)?);
        } else {
            println!(
                "{:<24} {:<10} {:>6.1}%  {}  {}  {}",
                row.task_id,
                row.status,
                row.percentage,
                row.started,
                row.last_updated,
                row.error.unwrap_or(row.message)
            );
        }
    }
    Ok(())
}

/// Opens the history database and brings its schema up to date.
pub async fn open_history(path: PathBuf) -> CliResult<Arc<SqliteHistoryStore>> {
    let store = Arc::new(SqliteHistoryStore::new(path));
    let migrating = store.clone();
    tokio::task::spawn_blocking(move || migrating.migrate_to_latest()).await??;
    Ok(store)
}

fn rfc3339(value: SystemTime) -> CliResult<String> {
    Ok(OffsetDateTime::from(value).format(&Rfc3339)?)
}
