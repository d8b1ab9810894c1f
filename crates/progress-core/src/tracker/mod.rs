pub mod calculation;
mod fanout;
mod sweep;
mod teardown;

pub use sweep::SweepReport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde_json::Value;
use tokio::task::AbortHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::{DuplicatePolicy, TrackerConfig};
use crate::models::{
    CoreError, CoreErrorKind, StagePlan, TaskId, TaskPatch, TaskSnapshot, TaskStatus,
};
use crate::persistence::TaskHistoryStore;
use crate::tracker::calculation::{estimate_completion, weighted_percentage};
use crate::tracker::fanout::{ObserverRecord, broadcast};
use crate::tracker::teardown::PendingTeardown;

pub type TrackerResult<T> = Result<T, CoreError>;

const DEFAULT_START_MESSAGE: &str = "Task started";
const DEFAULT_COMPLETE_MESSAGE: &str = "Task completed successfully";

/// Owns every tracked task and the observers watching them.
///
/// Cloning yields another handle onto the same registry. Driver-facing calls
/// (`create`, `update`, `complete`, `fail`) never fail: unknown ids are logged
/// and ignored so bookkeeping can never break the job being tracked.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    history: Option<Arc<dyn TaskHistoryStore>>,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    tasks: HashMap<TaskId, TaskSnapshot>,
    observers: HashMap<TaskId, Vec<ObserverRecord>>,
    pending_teardowns: HashMap<TaskId, PendingTeardown>,
    sweeper: Option<AbortHandle>,
    next_observer_id: u64,
    next_teardown_generation: u64,
}

// Timers and watchers only hold a `Weak` to this, so dropping the last handle
// must close the channels they would otherwise have closed.
impl Drop for TrackerInner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let closed = state.release_all();
        if closed > 0 {
            tracing::debug!(closed, "observer channels closed on tracker drop");
        }
    }
}

impl ProgressTracker {
    pub fn new(config: TrackerConfig) -> TrackerResult<Self> {
        Self::with_parts(config, Arc::new(SystemClock), None)
    }

    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> TrackerResult<Self> {
        Self::with_parts(config, clock, None)
    }

    pub fn with_history_store(
        config: TrackerConfig,
        history: Arc<dyn TaskHistoryStore>,
    ) -> TrackerResult<Self> {
        Self::with_parts(config, Arc::new(SystemClock), Some(history))
    }

    pub fn with_parts(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        history: Option<Arc<dyn TaskHistoryStore>>,
    ) -> TrackerResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(TrackerInner {
                config,
                clock,
                history,
                state: Mutex::new(TrackerState::default()),
            }),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn plan(&self) -> &StagePlan {
        &self.inner.config.stages
    }

    /// Starts tracking `task_id`, replacing any task already registered under
    /// the same id.
    pub fn create(&self, task_id: TaskId, total: u64, message: Option<&str>) -> TaskSnapshot {
        let now = self.now();
        let mut state = self.lock_state();
        self.create_locked(&mut state, task_id, total, message, now)
    }

    /// Like [`Self::create`], but honours the configured duplicate policy.
    pub fn try_create(
        &self,
        task_id: TaskId,
        total: u64,
        message: Option<&str>,
    ) -> TrackerResult<TaskSnapshot> {
        let now = self.now();
        let mut state = self.lock_state();
        if self.inner.config.duplicate_policy == DuplicatePolicy::Reject
            && state.tasks.contains_key(&task_id)
        {
            return Err(CoreError::for_task(
                &task_id,
                CoreErrorKind::DuplicateTask,
                "a task with this id is already tracked",
            ));
        }
        Ok(self.create_locked(&mut state, task_id, total, message, now))
    }

    pub fn update(&self, task_id: &TaskId, patch: TaskPatch) {
        let now = self.now();
        let plan = self.plan();
        let mut state = self.lock_state();
        let TrackerState {
            tasks, observers, ..
        } = &mut *state;

        let Some(task) = tasks.get_mut(task_id) else {
            tracing::warn!(task_id = %task_id, "ignoring progress update for unknown task");
            return;
        };

        let recompute = patch.touches_progress();
        if let Some(stage) = patch.stage {
            if plan.contains(&stage) {
                task.stage = stage;
            } else {
                tracing::warn!(
                    task_id = %task_id,
                    stage = %stage,
                    "ignoring unknown stage in progress update"
                );
            }
        }
        if let Some(total) = patch.total {
            task.total = total;
        }
        if let Some(current) = patch.current {
            task.current = current;
        }
        if let Some(message) = patch.message {
            task.message = message;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        task.last_updated = now;

        if recompute {
            task.percentage = weighted_percentage(plan, &task.stage, task.current, task.total);
        }
        if task.percentage > 0.0
            && task.status == TaskStatus::Running
            && let Some(eta) = estimate_completion(task.start_time, now, task.percentage)
        {
            task.estimated_completion = Some(eta);
        }

        let snapshot = task.clone();
        broadcast(observers, &snapshot, now);
    }

    pub fn complete(&self, task_id: &TaskId, result: Option<Value>, message: Option<&str>) {
        let now = self.now();
        let mut state = self.lock_state();
        let TrackerState {
            tasks, observers, ..
        } = &mut *state;

        let Some(task) = tasks.get_mut(task_id) else {
            tracing::warn!(task_id = %task_id, "ignoring completion for unknown task");
            return;
        };

        task.status = TaskStatus::Completed;
        if let Some(stage) = self.plan().terminal_stage() {
            task.stage = stage.to_string();
        }
        task.current = task.total;
        task.percentage = 100.0;
        task.result = result;
        task.message = message.unwrap_or(DEFAULT_COMPLETE_MESSAGE).to_string();
        task.last_updated = now;

        let snapshot = task.clone();
        broadcast(observers, &snapshot, now);
        tracing::debug!(task_id = %task_id, "task completed");
        self.schedule_teardown(&mut state, task_id);
    }

    pub fn fail(&self, task_id: &TaskId, error_message: &str) {
        let now = self.now();
        let mut state = self.lock_state();
        let TrackerState {
            tasks, observers, ..
        } = &mut *state;

        let Some(task) = tasks.get_mut(task_id) else {
            tracing::warn!(task_id = %task_id, "ignoring failure for unknown task");
            return;
        };

        task.status = TaskStatus::Failed;
        task.error = Some(error_message.to_string());
        task.message = format!("Task failed: {error_message}");
        task.last_updated = now;

        let snapshot = task.clone();
        broadcast(observers, &snapshot, now);
        tracing::debug!(task_id = %task_id, error = %error_message, "task failed");
        self.schedule_teardown(&mut state, task_id);
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.lock_state().tasks.get(task_id).cloned()
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let mut tasks: Vec<TaskSnapshot> = self.lock_state().tasks.values().cloned().collect();
        tasks.sort_by(|left, right| left.task_id.cmp(&right.task_id));
        tasks
    }
}

impl ProgressTracker {
    fn create_locked(
        &self,
        state: &mut TrackerState,
        task_id: TaskId,
        total: u64,
        message: Option<&str>,
        now: SystemTime,
    ) -> TaskSnapshot {
        let snapshot = TaskSnapshot {
            task_id: task_id.clone(),
            status: TaskStatus::Started,
            stage: self.plan().initial_stage().unwrap_or_default().to_string(),
            current: 0,
            total,
            percentage: 0.0,
            message: message.unwrap_or(DEFAULT_START_MESSAGE).to_string(),
            start_time: now,
            last_updated: now,
            estimated_completion: None,
            result: None,
            error: None,
        };

        if let Some(pending) = state.pending_teardowns.remove(&task_id) {
            pending.cancel();
        }
        if state.tasks.insert(task_id.clone(), snapshot.clone()).is_some() {
            tracing::warn!(task_id = %task_id, "replacing existing task with the same id");
        }

        broadcast(&mut state.observers, &snapshot, now);
        tracing::debug!(task_id = %task_id, total, "task created");
        snapshot
    }

    fn now(&self) -> SystemTime {
        self.inner.clock.now()
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        // Every mutation leaves the maps consistent, so a poisoned lock still
        // guards usable state.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
