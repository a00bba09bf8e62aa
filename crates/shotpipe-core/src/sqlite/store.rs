use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, params};
use thiserror::Error;

use crate::models::{DataType, JobKind, TaskError, TaskErrorKind, TaskRecord};
use crate::persistence::{HistoryStore, MigrationStore, PersistenceResult};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "shotpipe_schema_migrations";

#[derive(Debug, Error)]
enum StoreError {
    #[error("sqlite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Corrupt(String),
}

/// SQLite-backed task history. Opens a fresh connection per call; the
/// scheduler serializes appends, and SQLite serializes the rest.
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
        operation: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, StoreError::Sqlite(error)))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteHistoryStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            Ok(read_current_version(connection)?)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error(
                "apply_migration",
                StoreError::Corrupt(format!(
                    "invalid migration target version '{target_version}'"
                )),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // Re-apply the DDL to repair a database where the version was
                // recorded but tables are missing; all DDL uses IF NOT EXISTS.
                for version in 1..=target_version {
                    if let Some(entry) = migration(version) {
                        connection.execute_batch(entry.up_sql)?;
                    }
                }
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    let Some(entry) = migration(version) else {
                        return Err(StoreError::Corrupt(format!(
                            "migration version '{version}' is not defined"
                        )));
                    };
                    apply_up_migration(connection, entry)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    let Some(entry) = migration(version) else {
                        return Err(StoreError::Corrupt(format!(
                            "migration version '{version}' is not defined"
                        )));
                    };
                    apply_down_migration(connection, entry)?;
                }
            }

            Ok(())
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, record: &TaskRecord) -> PersistenceResult<()> {
        self.with_connection("append", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO task_history (
    job, data_type, file_name, file_path, source_url,
    url, thumbnail_url, deletion_url, shortened_url, completed_at_unix
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
",
                params![
                    record.job.as_str(),
                    record.data_type.as_str(),
                    record.file_name.as_str(),
                    record
                        .file_path
                        .as_ref()
                        .map(|path| path.to_string_lossy().to_string()),
                    record.source_url.as_deref(),
                    record.url.as_deref(),
                    record.thumbnail_url.as_deref(),
                    record.deletion_url.as_deref(),
                    record.shortened_url.as_deref(),
                    to_unix_seconds(record.completed_at)?,
                ],
            )?;
            Ok(())
        })
    }

    fn recent(&self, limit: usize) -> PersistenceResult<Vec<TaskRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("recent", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT job, data_type, file_name, file_path, source_url,
       url, thumbnail_url, deletion_url, shortened_url, completed_at_unix
FROM task_history
ORDER BY completed_at_unix DESC, id DESC
LIMIT ?1
",
            )?;

            type RawRow = (
                String,
                String,
                String,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
                i64,
            );

            let rows: Vec<RawRow> = statement
                .query_map(params![to_i64(limit)?], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                })?
                .collect::<Result<_, _>>()?;

            rows.into_iter()
                .map(|row| {
                    let (
                        job_raw,
                        data_type_raw,
                        file_name,
                        file_path,
                        source_url,
                        url,
                        thumbnail_url,
                        deletion_url,
                        shortened_url,
                        completed_at_unix,
                    ) = row;

                    Ok(TaskRecord {
                        job: parse_job(&job_raw)?,
                        data_type: parse_data_type(&data_type_raw)?,
                        file_name,
                        file_path: file_path.map(PathBuf::from),
                        source_url,
                        url,
                        thumbnail_url,
                        deletion_url,
                        shortened_url,
                        completed_at: from_unix_seconds(completed_at_unix)?,
                    })
                })
                .collect()
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> Result<(), StoreError> {
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

fn ensure_schema_ready(connection: &Connection) -> Result<(), StoreError> {
    ensure_migrations_table(connection)?;
    if read_current_version(connection)? <= 0 {
        return Err(StoreError::Corrupt(
            "database schema is not initialized; apply migrations before history operations"
                .to_string(),
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

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> Result<(), StoreError> {
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
) -> Result<(), StoreError> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn parse_job(raw: &str) -> Result<JobKind, StoreError> {
    JobKind::from_str(raw).ok_or_else(|| {
        StoreError::Corrupt(format!("unknown job kind '{raw}' in sqlite record"))
    })
}

fn parse_data_type(raw: &str) -> Result<DataType, StoreError> {
    DataType::from_str(raw).ok_or_else(|| {
        StoreError::Corrupt(format!("unknown data type '{raw}' in sqlite record"))
    })
}

fn to_unix_seconds(value: SystemTime) -> Result<i64, StoreError> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        StoreError::Corrupt(format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_secs())
        .map_err(|_| StoreError::Corrupt("unix timestamp seconds exceed i64 range".to_string()))
}

fn from_unix_seconds(value: i64) -> Result<SystemTime, StoreError> {
    let seconds = u64::try_from(value).map_err(|_| {
        StoreError::Corrupt("negative unix timestamps are not supported".to_string())
    })?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn to_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt("value exceeds i64 range".to_string()))
}

fn storage_error(operation: &str, error: StoreError) -> TaskError {
    TaskError::new(
        TaskErrorKind::Storage,
        format!("sqlite history store '{operation}' failed: {error}"),
    )
}
