use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use progress_core::ProgressTracker;
use progress_core::clock::SystemClock;
use progress_core::config::TrackerConfig;
use progress_core::models::{ProgressFrame, TaskId, TaskPatch, TaskStatus};
use progress_core::observer::{ProgressReceiver, progress_channel};
use progress_core::persistence::TaskHistoryStore;
use serde_json::json;

use crate::error::{CliError, CliResult};
use crate::history::open_history;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Identifier the job is tracked under
    #[arg(long, default_value = "seed-demo")]
    task_id: String,

    /// Records processed per stage
    #[arg(long, default_value_t = 1_000)]
    records: u64,

    /// Records reported per progress update
    #[arg(long, default_value_t = 250, value_parser = clap::value_parser!(u64).range(1..))]
    batch: u64,

    /// Pause between batches, in milliseconds
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,

    /// Fail the job on entering this stage
    #[arg(long)]
    fail_at: Option<String>,

    #[arg(long, value_enum, default_value_t = FrameFormat::Json)]
    format: FrameFormat,

    /// SQLite file that receives the final snapshot
    #[arg(long, env = "PROGRESS_HISTORY_DB")]
    db: Option<PathBuf>,

    /// Configuration file path (overrides PROGRESS_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum FrameFormat {
    /// One JSON frame per line
    Json,
    /// Server-sent event records
    Sse,
}

pub async fn execute(args: RunArgs) -> CliResult<()> {
    let config = TrackerConfig::load(args.config.as_deref())?;
    if let Some(stage) = &args.fail_at
        && !config.stages.contains(stage)
    {
        return Err(CliError::UnknownStage(stage.clone()));
    }

    let history = match &args.db {
        Some(path) => Some(open_history(path.clone()).await?),
        None => None,
    };
    let tracker = ProgressTracker::with_parts(
        config,
        Arc::new(SystemClock),
        history
            .clone()
            .map(|store| store as Arc<dyn TaskHistoryStore>),
    )?;
    tracker.spawn_sweeper()?;

    let task_id = TaskId::new(args.task_id.as_str())?;
    tracker.create(task_id.clone(), args.records, Some("Seeding started"));

    let (sink, receiver) = progress_channel();
    if !tracker.register_observer(&task_id, Arc::new(sink)) {
        return Err(CliError::ObserverRefused(task_id.to_string()));
    }
    let printer = tokio::spawn(print_frames(receiver, args.format));

    tokio::select! {
        () = drive_seed_job(&tracker, &task_id, &args) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracker.fail(&task_id, "interrupted");
        }
    }

    // The channel closes once the tracker tears the observer down.
    let printed = printer.await??;
    tracing::debug!(task_id = %task_id, printed, "observer channel closed");

    if let Some(store) = history
        && let Some(snapshot) = tracker.get_task(&task_id)
    {
        let status = snapshot.status;
        tokio::task::spawn_blocking(move || store.archive_tasks(&[snapshot])).await??;
        tracing::info!(
            task_id = %task_id,
            status = status.as_str(),
            "archived final snapshot"
        );
    }

    tracker.shutdown();
    Ok(())
}

async fn drive_seed_job(tracker: &ProgressTracker, task_id: &TaskId, args: &RunArgs) {
    let delay = Duration::from_millis(args.delay_ms);
    let stages: Vec<String> = tracker
        .plan()
        .stages()
        .iter()
        .map(|stage| stage.name.clone())
        .collect();

    for stage in &stages {
        if args.fail_at.as_deref() == Some(stage.as_str()) {
            tracker.fail(task_id, &format!("simulated failure during {stage}"));
            return;
        }

        tracker.update(
            task_id,
            TaskPatch::new()
                .stage(stage.as_str())
                .total(args.records)
                .current(0)
                .status(TaskStatus::Running)
                .message(format!("Processing {stage}")),
        );

        let mut current = 0;
        while current < args.records {
            tokio::time::sleep(delay).await;
            current = current.saturating_add(args.batch).min(args.records);
            tracker.update(task_id, TaskPatch::new().current(current));
        }
    }

    tracker.complete(
        task_id,
        Some(json!({ "records": args.records, "stages": stages.len() })),
        None,
    );
}

async fn print_frames(mut receiver: ProgressReceiver, format: FrameFormat) -> CliResult<usize> {
    let mut printed = 0;
    while let Some(frame) = receiver.recv().await {
        let rendered = render_frame(&frame, format)?;
        {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
        }
        printed += 1;
    }
    Ok(printed)
}

fn render_frame(frame: &ProgressFrame, format: FrameFormat) -> CliResult<String> {
    Ok(match format {
        FrameFormat::Json => format!("{}\n", frame.to_json()?),
        FrameFormat::Sse => frame.to_sse()?,
    })
}
