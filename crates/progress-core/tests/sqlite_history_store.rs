use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use progress_core::models::{CoreErrorKind, TaskId, TaskSnapshot, TaskStatus};
use progress_core::persistence::{MigrationStore, TaskHistoryStore};
use progress_core::sqlite::{SqliteHistoryStore, current_schema_version, migration, migrations};
use serde_json::json;

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time must be after epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("progress-{test_name}-{nanos}.sqlite3"))
}

fn migrated_store(test_name: &str) -> SqliteHistoryStore {
    let store = SqliteHistoryStore::new(test_db_path(test_name));
    store.migrate_to_latest().unwrap();
    store
}

fn at(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds)
}

fn snapshot(raw_id: &str, started: u64, updated: u64, status: TaskStatus) -> TaskSnapshot {
    TaskSnapshot {
        task_id: TaskId::new(raw_id).unwrap(),
        status,
        stage: "FINALIZING".to_string(),
        current: 10_000,
        total: 10_000,
        percentage: 100.0,
        message: "Task completed successfully".to_string(),
        start_time: at(started),
        last_updated: at(updated),
        estimated_completion: None,
        result: None,
        error: None,
    }
}

#[test]
fn migration_versions_are_strictly_increasing() {
    let entries = migrations();
    assert!(!entries.is_empty());

    let mut previous = 0;
    for entry in entries {
        assert!(entry.version > previous);
        assert!(!entry.up_sql.trim().is_empty());
        assert!(!entry.down_sql.trim().is_empty());
        previous = entry.version;
    }

    let latest = migration(current_schema_version()).expect("latest migration must exist");
    assert_eq!(latest.version, current_schema_version());
}

#[test]
fn fresh_database_starts_unmigrated() {
    let store = SqliteHistoryStore::new(test_db_path("fresh"));

    assert_eq!(store.current_version().unwrap(), 0);
    assert_eq!(store.planned_migrations(0)[0].version, 1);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());
    assert!(store.planned_migrations(current_schema_version()).is_empty());
}

#[test]
fn history_operations_require_migrated_schema() {
    let store = SqliteHistoryStore::new(test_db_path("unmigrated"));

    let error = store.list_recent(10).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("list_recent"));
}

#[test]
fn applying_undefined_migration_fails_with_storage_error() {
    let store = SqliteHistoryStore::new(test_db_path("undefined-migration"));

    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}

#[test]
fn migrating_down_drops_history_table() {
    let store = migrated_store("migrate-down");
    store
        .archive_tasks(&[snapshot("seed-1", 0, 10, TaskStatus::Completed)])
        .unwrap();

    store.apply_migration(0).unwrap();

    assert_eq!(store.current_version().unwrap(), 0);
    assert!(store.list_recent(10).is_err());

    store.migrate_to_latest().unwrap();
    assert!(store.list_recent(10).unwrap().is_empty());
}

#[test]
fn archived_snapshot_is_read_back_intact() {
    let store = migrated_store("round-trip");
    let mut failed = snapshot("seed-9", 0, 42, TaskStatus::Failed);
    failed.stage = "INSERTING_USERS".to_string();
    failed.current = 1_234;
    failed.percentage = 61.17;
    failed.message = "Task failed: disk full".to_string();
    failed.error = Some("disk full".to_string());
    failed.estimated_completion = Some(at(90));
    failed.result = Some(json!({ "inserted": { "users": 1234 } }));

    store.archive_tasks(std::slice::from_ref(&failed)).unwrap();

    let found = store
        .find_latest(&failed.task_id)
        .unwrap()
        .expect("archived task must be found");
    assert_eq!(found, failed);
}

#[test]
fn list_recent_orders_by_last_update() {
    let store = migrated_store("list-recent");
    store
        .archive_tasks(&[
            snapshot("older", 0, 10, TaskStatus::Completed),
            snapshot("newest", 0, 30, TaskStatus::Completed),
            snapshot("middle", 0, 20, TaskStatus::Failed),
        ])
        .unwrap();

    let ids: Vec<String> = store
        .list_recent(2)
        .unwrap()
        .into_iter()
        .map(|task| task.task_id.to_string())
        .collect();

    assert_eq!(ids, vec!["newest", "middle"]);
    assert!(store.list_recent(0).unwrap().is_empty());
}

#[test]
fn rerun_of_same_id_is_kept_as_separate_row() {
    let store = migrated_store("reruns");
    let id = TaskId::new("nightly-seed").unwrap();
    store
        .archive_tasks(&[snapshot("nightly-seed", 0, 10, TaskStatus::Failed)])
        .unwrap();
    store
        .archive_tasks(&[snapshot("nightly-seed", 100, 110, TaskStatus::Completed)])
        .unwrap();

    let latest = store.find_latest(&id).unwrap().unwrap();

    assert_eq!(latest.status, TaskStatus::Completed);
    assert_eq!(latest.start_time, at(100));
    assert_eq!(store.list_recent(10).unwrap().len(), 2);
}

#[test]
fn archiving_same_run_twice_updates_in_place() {
    let store = migrated_store("upsert");
    let mut task = snapshot("seed-1", 0, 10, TaskStatus::Running);
    store.archive_tasks(std::slice::from_ref(&task)).unwrap();

    task.status = TaskStatus::Completed;
    task.last_updated = at(20);
    store.archive_tasks(std::slice::from_ref(&task)).unwrap();

    let rows = store.list_recent(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TaskStatus::Completed);
}

#[test]
fn missing_task_is_not_found() {
    let store = migrated_store("missing");

    let found = store.find_latest(&TaskId::new("nope").unwrap()).unwrap();

    assert_eq!(found, None);
}

#[test]
fn prune_removes_rows_updated_before_cutoff() {
    let store = migrated_store("prune");
    store
        .archive_tasks(&[
            snapshot("old", 0, 10, TaskStatus::Completed),
            snapshot("boundary", 0, 20, TaskStatus::Completed),
            snapshot("new", 0, 30, TaskStatus::Completed),
        ])
        .unwrap();

    let deleted = store.prune_archived(at(20)).unwrap();

    assert_eq!(deleted, 1);
    let remaining: Vec<String> = store
        .list_recent(10)
        .unwrap()
        .into_iter()
        .map(|task| task.task_id.to_string())
        .collect();
    assert_eq!(remaining, vec!["new", "boundary"]);
}
