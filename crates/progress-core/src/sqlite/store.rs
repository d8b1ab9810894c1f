use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::timestamp::{from_unix_millis, to_unix_millis};
use crate::models::{CoreError, CoreErrorKind, TaskId, TaskSnapshot, TaskStatus};
use crate::persistence::{MigrationStore, PersistenceResult, TaskHistoryStore};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "progress_schema_migrations";

const HISTORY_COLUMNS: &str = "task_id, started_at_ms, status, stage, current_units, total_units, \
     percentage, message, last_updated_ms, estimated_completion_ms, result_json, error";

pub struct SqliteHistoryStore {
    database_path: PathBuf,
}

impl SqliteHistoryStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteHistoryStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl TaskHistoryStore for SqliteHistoryStore {
    fn archive_tasks(&self, tasks: &[TaskSnapshot]) -> PersistenceResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        self.with_connection("archive_tasks", |connection| {
            ensure_schema_ready(connection)?;
            let archived_at = to_i64(to_unix_millis(SystemTime::now()))?;
            let transaction = connection.transaction()?;
            {
                let mut statement = transaction.prepare(
                    "
INSERT INTO task_history (
    task_id, started_at_ms, status, stage, current_units, total_units, percentage,
    message, last_updated_ms, estimated_completion_ms, result_json, error, archived_at_ms
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(task_id, started_at_ms) DO UPDATE SET
    status = excluded.status,
    stage = excluded.stage,
    current_units = excluded.current_units,
    total_units = excluded.total_units,
    percentage = excluded.percentage,
    message = excluded.message,
    last_updated_ms = excluded.last_updated_ms,
    estimated_completion_ms = excluded.estimated_completion_ms,
    result_json = excluded.result_json,
    error = excluded.error,
    archived_at_ms = excluded.archived_at_ms
",
                )?;

                for task in tasks {
                    let result_json = task
                        .result
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()
                        .map_err(|error| {
                            storage_error_sqlite(&format!("failed to encode task result: {error}"))
                        })?;
                    let estimated_completion = task
                        .estimated_completion
                        .map(|value| to_i64(to_unix_millis(value)))
                        .transpose()?;

                    statement.execute(params![
                        task.task_id.as_str(),
                        to_i64(to_unix_millis(task.start_time))?,
                        task.status.as_str(),
                        task.stage.as_str(),
                        to_i64(task.current)?,
                        to_i64(task.total)?,
                        task.percentage,
                        task.message.as_str(),
                        to_i64(to_unix_millis(task.last_updated))?,
                        estimated_completion,
                        result_json,
                        task.error.as_deref(),
                        archived_at,
                    ])?;
                }
            }
            transaction.commit()?;
            Ok(())
        })
    }

    fn list_recent(&self, limit: usize) -> PersistenceResult<Vec<TaskSnapshot>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("list_recent", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {HISTORY_COLUMNS}
FROM task_history
ORDER BY last_updated_ms DESC, task_id ASC
LIMIT ?1
"
            ))?;
            let rows = statement.query_map(params![to_i64(limit)?], snapshot_from_row)?;
            rows.collect()
        })
    }

    fn find_latest(&self, task_id: &TaskId) -> PersistenceResult<Option<TaskSnapshot>> {
        self.with_connection("find_latest", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    &format!(
                        "
SELECT {HISTORY_COLUMNS}
FROM task_history
WHERE task_id = ?1
ORDER BY started_at_ms DESC
LIMIT 1
"
                    ),
                    params![task_id.as_str()],
                    snapshot_from_row,
                )
                .optional()
        })
    }

    fn prune_archived(&self, cutoff: SystemTime) -> PersistenceResult<usize> {
        self.with_connection("prune_archived", |connection| {
            ensure_schema_ready(connection)?;
            let deleted = connection.execute(
                "DELETE FROM task_history WHERE last_updated_ms < ?1",
                params![to_i64(to_unix_millis(cutoff))?],
            )?;
            Ok(deleted)
        })
    }
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<TaskSnapshot> {
    let task_id_raw: String = row.get(0)?;
    let started_at_ms: i64 = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let current_units: i64 = row.get(4)?;
    let total_units: i64 = row.get(5)?;
    let last_updated_ms: i64 = row.get(8)?;
    let estimated_completion_ms: Option<i64> = row.get(9)?;
    let result_json: Option<String> = row.get(10)?;

    let result = result_json
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|error| {
            storage_error_sqlite(&format!("invalid result JSON in sqlite record: {error}"))
        })?;

    Ok(TaskSnapshot {
        task_id: TaskId::new(task_id_raw)
            .map_err(|_| storage_error_sqlite("empty task id in sqlite record"))?,
        status: status_raw.parse::<TaskStatus>().map_err(|_| {
            storage_error_sqlite(&format!(
                "unknown task status '{status_raw}' in sqlite record"
            ))
        })?,
        stage: row.get(3)?,
        current: to_u64(current_units)?,
        total: to_u64(total_units)?,
        percentage: row.get(6)?,
        message: row.get(7)?,
        start_time: from_unix_millis(to_u64(started_at_ms)?),
        last_updated: from_unix_millis(to_u64(last_updated_ms)?),
        estimated_completion: estimated_completion_ms
            .map(|value| to_u64(value).map(from_unix_millis))
            .transpose()?,
        result,
        error: row.get(11)?,
    })
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before history operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn to_i64(value: impl TryInto<i64>) -> rusqlite::Result<i64> {
    value
        .try_into()
        .map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative value in sqlite record"))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}
