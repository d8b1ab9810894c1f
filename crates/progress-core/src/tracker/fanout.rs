use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::task::AbortHandle;

use crate::models::{ProgressFrame, TaskId, TaskSnapshot};
use crate::observer::{ObserverId, ProgressSink};
use crate::tracker::ProgressTracker;

pub(crate) struct ObserverRecord {
    id: ObserverId,
    sink: Arc<dyn ProgressSink>,
    connected_at: SystemTime,
    is_active: bool,
    watcher: Option<AbortHandle>,
}

impl ProgressTracker {
    /// Subscribes `sink` to `task_id`. The current snapshot is pushed right
    /// away; `false` means the task is unknown or the sink rejected that
    /// first frame.
    pub fn register_observer(&self, task_id: &TaskId, sink: Arc<dyn ProgressSink>) -> bool {
        let now = self.now();
        let mut state = self.lock_state();

        let Some(task) = state.tasks.get(task_id) else {
            tracing::warn!(task_id = %task_id, "refusing observer for unknown task");
            return false;
        };
        let terminal = task.status.is_terminal();

        if let Err(error) = sink.push(ProgressFrame::new(task.clone(), now)) {
            tracing::warn!(
                task_id = %task_id,
                error = %error,
                "observer rejected initial snapshot"
            );
            return false;
        }

        let observer_id = ObserverId(state.next_observer_id);
        state.next_observer_id = state.next_observer_id.saturating_add(1);
        let watcher = self.spawn_disconnect_watcher(task_id.clone(), observer_id, sink.clone());

        state
            .observers
            .entry(task_id.clone())
            .or_default()
            .push(ObserverRecord {
                id: observer_id,
                sink,
                connected_at: now,
                is_active: true,
                watcher,
            });

        // A late subscriber to a finished task still gets its channel closed.
        if terminal && !state.pending_teardowns.contains_key(task_id) {
            self.schedule_teardown(&mut state, task_id);
        }

        tracing::debug!(
            task_id = %task_id,
            observer_id = observer_id.0,
            "observer registered"
        );
        true
    }

    pub fn observer_count(&self, task_id: &TaskId) -> usize {
        self.lock_state()
            .observers
            .get(task_id)
            .map(|records| records.iter().filter(|record| record.is_active).count())
            .unwrap_or(0)
    }

    /// Connect times of the active observers on `task_id`, oldest first.
    pub fn observer_connections(&self, task_id: &TaskId) -> Vec<(ObserverId, SystemTime)> {
        let state = self.lock_state();
        let mut connections: Vec<_> = state
            .observers
            .get(task_id)
            .into_iter()
            .flatten()
            .filter(|record| record.is_active)
            .map(|record| (record.id, record.connected_at))
            .collect();
        connections.sort_by_key(|(id, connected_at)| (*connected_at, *id));
        connections
    }

    fn spawn_disconnect_watcher(
        &self,
        task_id: TaskId,
        observer_id: ObserverId,
        sink: Arc<dyn ProgressSink>,
    ) -> Option<AbortHandle> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let tracker = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            sink.closed().await;
            if let Some(inner) = tracker.upgrade() {
                ProgressTracker { inner }.observer_disconnected(&task_id, observer_id);
            }
        });
        Some(handle.abort_handle())
    }

    fn observer_disconnected(&self, task_id: &TaskId, observer_id: ObserverId) {
        let mut state = self.lock_state();
        let Some(records) = state.observers.get_mut(task_id) else {
            return;
        };
        let Some(record) = records.iter_mut().find(|record| record.id == observer_id) else {
            return;
        };

        record.is_active = false;
        record.watcher = None;
        tracing::debug!(
            task_id = %task_id,
            observer_id = observer_id.0,
            "observer disconnected"
        );

        // Drop the whole entry once nobody is left; otherwise the next
        // broadcast prunes it.
        if records.iter().all(|record| !record.is_active) {
            close_observers(&mut state.observers, task_id);
        }
    }
}

/// Pushes the snapshot to every active observer of its task and returns how
/// many accepted it. A failing observer is marked inactive and pruned without
/// affecting the others.
pub(crate) fn broadcast(
    observers: &mut HashMap<TaskId, Vec<ObserverRecord>>,
    task: &TaskSnapshot,
    now: SystemTime,
) -> usize {
    let Some(records) = observers.get_mut(&task.task_id) else {
        return 0;
    };

    let frame = ProgressFrame::new(task.clone(), now);
    let mut delivered = 0;
    for record in records.iter_mut().filter(|record| record.is_active) {
        match record.sink.push(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(error) => {
                tracing::warn!(
                    task_id = %task.task_id,
                    observer_id = record.id.0,
                    error = %error,
                    "observer delivery failed; marking inactive"
                );
                record.is_active = false;
            }
        }
    }

    prune_inactive(observers, &task.task_id);
    delivered
}

fn prune_inactive(observers: &mut HashMap<TaskId, Vec<ObserverRecord>>, task_id: &TaskId) {
    let Some(records) = observers.get_mut(task_id) else {
        return;
    };

    let (active, inactive): (Vec<_>, Vec<_>) =
        records.drain(..).partition(|record| record.is_active);
    *records = active;
    for record in &inactive {
        release_observer(record, task_id);
    }

    if records.is_empty() {
        observers.remove(task_id);
    }
}

/// Removes and closes every observer of `task_id`; returns how many closed
/// cleanly. Close failures are logged per observer.
pub(crate) fn close_observers(
    observers: &mut HashMap<TaskId, Vec<ObserverRecord>>,
    task_id: &TaskId,
) -> usize {
    let Some(records) = observers.remove(task_id) else {
        return 0;
    };

    records
        .into_iter()
        .filter(|record| release_observer(record, task_id))
        .count()
}

fn release_observer(record: &ObserverRecord, task_id: &TaskId) -> bool {
    if let Some(watcher) = &record.watcher {
        watcher.abort();
    }
    match record.sink.close() {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(
                task_id = %task_id,
                observer_id = record.id.0,
                error = %error,
                "failed to close observer channel"
            );
            false
        }
    }
}
