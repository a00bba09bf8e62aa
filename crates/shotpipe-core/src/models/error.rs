use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::models::{DataType, JobKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskErrorKind {
    Configuration,
    Download,
    PostCapture,
    Ocr,
    Upload,
    PostUpload,
    Storage,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskError {
    pub job: Option<JobKind>,
    pub data_type: Option<DataType>,
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            job: None,
            data_type: None,
            kind,
            message: message.into(),
        }
    }

    pub fn attributed(self, job: JobKind, data_type: DataType) -> Self {
        Self {
            job: self.job.or(Some(job)),
            data_type: self.data_type.or(Some(data_type)),
            kind: self.kind,
            message: self.message,
        }
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for TaskError {}

pub type TaskResult<T> = Result<T, TaskError>;
