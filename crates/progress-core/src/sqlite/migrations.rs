#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "task_history",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS task_history (
    task_id TEXT NOT NULL,
    started_at_ms INTEGER NOT NULL,
    status TEXT NOT NULL,
    stage TEXT NOT NULL,
    current_units INTEGER NOT NULL,
    total_units INTEGER NOT NULL,
    percentage REAL NOT NULL,
    message TEXT NOT NULL,
    last_updated_ms INTEGER NOT NULL,
    estimated_completion_ms INTEGER,
    result_json TEXT,
    error TEXT,
    archived_at_ms INTEGER NOT NULL,
    PRIMARY KEY (task_id, started_at_ms)
);

CREATE INDEX IF NOT EXISTS idx_task_history_last_updated
    ON task_history (last_updated_ms DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_task_history_last_updated;
DROP TABLE IF EXISTS task_history;
"#,
};

const MIGRATIONS: [SqliteMigration; 1] = [MIGRATION_0001];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
