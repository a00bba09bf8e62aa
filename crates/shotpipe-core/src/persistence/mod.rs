use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::{TaskError, TaskErrorKind, TaskRecord, TaskResult};

pub type PersistenceResult<T> = Result<T, TaskError>;

/// Append-only persistent history. Implementations must serialize their own
/// writes; the scheduler additionally never issues two appends concurrently.
pub trait HistoryStore: Send + Sync {
    fn append(&self, record: &TaskRecord) -> PersistenceResult<()>;

    /// Newest first.
    fn recent(&self, limit: usize) -> PersistenceResult<Vec<TaskRecord>>;
}

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// JSON-lines history file: one serialized `TaskRecord` per line, appended
/// under a mutex.
pub struct JsonHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&self, record: &TaskRecord) -> PersistenceResult<()> {
        let line = serde_json::to_string(record)
            .map_err(|error| storage_error(format!("failed to encode history record: {error}")))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| storage_error("history file mutex poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|error| {
                storage_error(format!(
                    "failed to open history file '{}': {error}",
                    self.path.display()
                ))
            })?;

        writeln!(file, "{line}")
            .map_err(|error| storage_error(format!("failed to append history record: {error}")))
    }

    fn recent(&self, limit: usize) -> PersistenceResult<Vec<TaskRecord>> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| storage_error("history file mutex poisoned".to_string()))?;

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(storage_error(format!(
                    "failed to read history file '{}': {error}",
                    self.path.display()
                )));
            }
        };

        let mut records = Vec::new();
        for line in contents.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            if records.len() == limit {
                break;
            }
            let record: TaskRecord = serde_json::from_str(line).map_err(|error| {
                storage_error(format!("failed to decode history record: {error}"))
            })?;
            records.push(record);
        }

        Ok(records)
    }
}

fn storage_error(message: String) -> TaskError {
    TaskError::new(TaskErrorKind::Storage, message)
}
