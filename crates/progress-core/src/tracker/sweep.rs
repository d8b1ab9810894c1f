use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;

use crate::models::{CoreError, CoreErrorKind, TaskSnapshot};
use crate::tracker::fanout::close_observers;
use crate::tracker::{ProgressTracker, TrackerResult};

/// Tasks evicted by one sweep pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepReport {
    /// Terminal tasks idle for longer than the retention window.
    pub removed: Vec<TaskSnapshot>,
    /// Tasks of any status older than the age ceiling.
    pub expired: Vec<TaskSnapshot>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.expired.is_empty()
    }

    pub fn evicted(&self) -> Vec<TaskSnapshot> {
        self.removed.iter().chain(&self.expired).cloned().collect()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Eviction {
    Stale,
    Expired,
}

impl ProgressTracker {
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(self.now())
    }

    /// One cleanup pass as of `now`. A terminal task is removed once
    /// `now - last_updated` strictly exceeds the retention window; any task is
    /// expired once `now - start_time` strictly exceeds the age ceiling.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let retention = self.inner.config.retention();
        let max_age = self.inner.config.max_task_age();
        let mut state = self.lock_state();

        let candidates: Vec<_> = state
            .tasks
            .values()
            .filter_map(|task| {
                eviction_for(task, now, retention, max_age).map(|kind| (task.task_id.clone(), kind))
            })
            .collect();

        let mut report = SweepReport::default();
        for (task_id, eviction) in candidates {
            let Some(task) = state.tasks.remove(&task_id) else {
                continue;
            };
            if let Some(pending) = state.pending_teardowns.remove(&task_id) {
                pending.cancel();
            }
            close_observers(&mut state.observers, &task_id);

            match eviction {
                Eviction::Stale => report.removed.push(task),
                Eviction::Expired => {
                    tracing::warn!(
                        task_id = %task_id,
                        status = task.status.as_str(),
                        "expiring task past the maximum age"
                    );
                    report.expired.push(task);
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                removed = report.removed.len(),
                expired = report.expired.len(),
                remaining = state.tasks.len(),
                "sweep evicted tasks"
            );
        }
        report
    }

    /// Sweeps and hands evicted tasks to the history store, if one is set.
    /// Archive failures are logged and never undo the eviction.
    pub async fn run_sweep(&self) -> SweepReport {
        let report = self.sweep();

        if let Some(history) = self.inner.history.clone()
            && !report.is_empty()
        {
            let evicted = report.evicted();
            let count = evicted.len();
            match tokio::task::spawn_blocking(move || history.archive_tasks(&evicted)).await {
                Ok(Ok(())) => tracing::debug!(count, "archived evicted tasks"),
                Ok(Err(error)) => tracing::warn!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to archive evicted tasks"
                ),
                Err(join_error) => tracing::warn!(
                    error = %join_error,
                    "task archive join failure"
                ),
            }
        }

        report
    }

    /// Starts the periodic sweep on the current tokio runtime. Calling it again
    /// while a sweeper is running is a no-op.
    pub fn spawn_sweeper(&self) -> TrackerResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("sweeper requires a tokio runtime: {error}"),
            )
        })?;

        let mut state = self.lock_state();
        if state.sweeper.is_some() {
            return Ok(());
        }

        let period = self.inner.config.sweep_interval();
        let tracker = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = tracker.upgrade() else {
                    break;
                };
                ProgressTracker { inner }.run_sweep().await;
            }
        });
        state.sweeper = Some(handle.abort_handle());
        Ok(())
    }

    pub fn is_sweeper_running(&self) -> bool {
        self.lock_state().sweeper.is_some()
    }
}

fn eviction_for(
    task: &TaskSnapshot,
    now: SystemTime,
    retention: Duration,
    max_age: Option<Duration>,
) -> Option<Eviction> {
    let idle = now
        .duration_since(task.last_updated)
        .unwrap_or(Duration::ZERO);
    if task.status.is_terminal() && idle > retention {
        return Some(Eviction::Stale);
    }

    let age = now.duration_since(task.start_time).unwrap_or(Duration::ZERO);
    match max_age {
        Some(max_age) if age > max_age => Some(Eviction::Expired),
        _ => None,
    }
}
