#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_history_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS task_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    data_type TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_path TEXT,
    source_url TEXT,
    url TEXT,
    thumbnail_url TEXT,
    deletion_url TEXT,
    shortened_url TEXT,
    completed_at_unix INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_history_completed_at
    ON task_history (completed_at_unix DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_task_history_completed_at;
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
