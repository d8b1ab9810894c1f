use std::sync::Arc;

use tokio::task::AbortHandle;

use crate::models::TaskId;
use crate::tracker::fanout::close_observers;
use crate::tracker::{ProgressTracker, TrackerState};

/// A scheduled close. `abort` cannot stop a timer that already fired and is
/// waiting on the state lock, so the generation decides whether it may act.
pub(super) struct PendingTeardown {
    generation: u64,
    handle: AbortHandle,
}

impl PendingTeardown {
    pub(super) fn cancel(self) {
        self.handle.abort();
    }
}

impl ProgressTracker {
    /// Closes the task's observer channels after the configured delay, giving
    /// the final frame time to reach the remote end. Rescheduling replaces any
    /// pending teardown for the same task.
    pub(super) fn schedule_teardown(&self, state: &mut TrackerState, task_id: &TaskId) {
        if let Some(previous) = state.pending_teardowns.remove(task_id) {
            previous.cancel();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                task_id = %task_id,
                "no async runtime available; closing observers without delay"
            );
            close_observers(&mut state.observers, task_id);
            return;
        };

        let generation = state.next_teardown_generation;
        state.next_teardown_generation = state.next_teardown_generation.wrapping_add(1);

        let delay = self.inner.config.teardown_delay();
        let tracker = Arc::downgrade(&self.inner);
        let target = task_id.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = tracker.upgrade() {
                ProgressTracker { inner }.run_teardown(&target, generation);
            }
        });
        state.pending_teardowns.insert(
            task_id.clone(),
            PendingTeardown {
                generation,
                handle: handle.abort_handle(),
            },
        );
    }

    fn run_teardown(&self, task_id: &TaskId, generation: u64) {
        let mut state = self.lock_state();
        match state.pending_teardowns.get(task_id) {
            Some(pending) if pending.generation == generation => {
                state.pending_teardowns.remove(task_id);
            }
            _ => {
                tracing::debug!(
                    task_id = %task_id,
                    generation,
                    "skipping superseded observer teardown"
                );
                return;
            }
        }
        let closed = close_observers(&mut state.observers, task_id);
        tracing::debug!(task_id = %task_id, closed, "observer channels torn down");
    }

    /// Cancels the sweeper and every pending delayed teardown, then closes all
    /// observer channels immediately. Tracked tasks are left in place.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        let closed = state.release_all();
        tracing::info!(closed, "progress tracker shut down");
    }

    pub fn pending_teardowns(&self) -> usize {
        self.lock_state().pending_teardowns.len()
    }
}

impl TrackerState {
    /// Stops every background task and closes every observer; returns how
    /// many observers closed cleanly.
    pub(super) fn release_all(&mut self) -> usize {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        for (_, pending) in self.pending_teardowns.drain() {
            pending.cancel();
        }

        let task_ids: Vec<TaskId> = self.observers.keys().cloned().collect();
        task_ids
            .iter()
            .map(|task_id| close_observers(&mut self.observers, task_id))
            .sum()
    }
}
