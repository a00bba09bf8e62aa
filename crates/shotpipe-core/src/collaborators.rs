use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::models::{ProgressSnapshot, TaskResult, UploadOutcome, UploadResult};
use crate::runner::EventSink;
use crate::task::TaskEvent;

/// Opaque decoded image. Codec work happens outside the core; tasks only
/// carry the handle and release it on the terminal transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageHandle {
    pub width: u32,
    pub height: u32,
    pub data: Arc<Vec<u8>>,
}

/// Handed to uploaders so they can report transfer progress. Reports update
/// the owning task's progress snapshot and flow through the task's event
/// channel, keeping per-task event ordering intact.
#[derive(Clone)]
pub struct ProgressSender {
    sink: Option<EventSink<TaskEvent>>,
    snapshot: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressSender {
    pub fn new(sink: EventSink<TaskEvent>, snapshot: Arc<Mutex<ProgressSnapshot>>) -> Self {
        Self {
            sink: Some(sink),
            snapshot,
        }
    }

    /// A sender that records nothing. For collaborator implementations under
    /// test that want to exercise the upload path without a live task.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            snapshot: Arc::new(Mutex::new(ProgressSnapshot::default())),
        }
    }

    pub fn report(&self, progress: ProgressSnapshot) {
        if let Ok(mut slot) = self.snapshot.lock() {
            *slot = progress;
        }
        if let Some(sink) = &self.sink {
            sink.emit(TaskEvent::UploadProgress(progress));
        }
    }
}

/// One upload destination. Implementations block; the pipeline invokes them
/// on a blocking thread. `abort` is the cooperative cancellation hook for an
/// in-flight transfer.
pub trait Uploader: Send + Sync {
    fn upload(
        &self,
        payload: &[u8],
        file_name: &str,
        progress: ProgressSender,
    ) -> TaskResult<UploadOutcome>;

    fn abort(&self);
}

pub trait Downloader: Send + Sync {
    fn download(&self, url: &str) -> TaskResult<Vec<u8>>;
}

/// Artifact flowing through post-capture actions. An action may rewrite the
/// path, the payload, or the image; an action that returns no artifact at
/// all halts the pipeline.
#[derive(Clone, Debug, Default)]
pub struct ActionInput {
    pub file_path: Option<PathBuf>,
    pub payload: Option<Arc<Vec<u8>>>,
    pub image: Option<ImageHandle>,
}

impl ActionInput {
    pub fn has_artifact(&self) -> bool {
        self.file_path.is_some() || self.payload.is_some() || self.image.is_some()
    }
}

pub trait PostCaptureAction: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, input: ActionInput) -> TaskResult<ActionInput>;
}

/// Runs after a successful upload (shortening, sharing, URL rewrite,
/// clipboard). Failures are recorded on the result but never demote the
/// upload.
pub trait PostUploadAction: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, result: &mut UploadResult) -> TaskResult<()>;
}

/// Best-effort text recognition; a failure is recorded and the pipeline
/// continues.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &ImageHandle) -> TaskResult<String>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NotificationCue {
    TaskCompleted,
    TaskFailed,
    TaskStopped,
}

pub trait NotificationPlayer: Send + Sync {
    fn play(&self, cue: NotificationCue);
}

pub trait SettingsAutosave: Send + Sync {
    fn request_save(&self);
}

/// Advisory hook raised when a task hits an unconfigured destination, so a
/// front end can open the destination settings. The pipeline never blocks on
/// it.
pub trait DestinationConfigPrompt: Send + Sync {
    fn request(&self, data_type: crate::models::DataType);
}
