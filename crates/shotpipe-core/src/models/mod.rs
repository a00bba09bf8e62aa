pub mod error;
pub mod record;
pub mod task;
pub mod upload;

pub use error::{TaskError, TaskErrorKind, TaskResult};
pub use record::TaskRecord;
pub use task::{DataType, JobKind, TaskId, TaskState};
pub use upload::{ProgressSnapshot, UploadOutcome, UploadResult};
