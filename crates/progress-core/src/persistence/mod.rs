use std::time::SystemTime;

use crate::models::{CoreError, TaskId, TaskSnapshot};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Archive of tasks the tracker has evicted.
pub trait TaskHistoryStore: Send + Sync {
    fn archive_tasks(&self, tasks: &[TaskSnapshot]) -> PersistenceResult<()>;

    fn list_recent(&self, limit: usize) -> PersistenceResult<Vec<TaskSnapshot>>;

    fn find_latest(&self, task_id: &TaskId) -> PersistenceResult<Option<TaskSnapshot>>;

    /// Deletes archived rows last updated before `cutoff`; returns the count.
    fn prune_archived(&self, cutoff: SystemTime) -> PersistenceResult<usize>;
}
