mod pipeline;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::collaborators::{
    Downloader, ImageHandle, OcrEngine, PostCaptureAction, PostUploadAction, Uploader,
};
use crate::config::UploadPolicy;
use crate::destinations::{DestinationId, DestinationRegistry};
use crate::models::{
    DataType, JobKind, ProgressSnapshot, TaskError, TaskErrorKind, TaskId, TaskRecord, TaskResult,
    TaskState, UploadResult,
};
use crate::runner::{BackgroundRunner, EventSink, StopToken};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a task can tell the outside world. Emitted through the task's
/// runner channel only, so delivery for one task is strictly ordered and
/// never happens on the worker itself.
#[derive(Clone, Debug)]
pub enum TaskEvent {
    StatusChanged {
        state: TaskState,
        status: String,
    },
    UploadStarted {
        destination: DestinationId,
        file_name: String,
    },
    UploadProgress(ProgressSnapshot),
    UploadCompleted {
        duration: Duration,
    },
    /// Advisory: a destination was unconfigured or invalid. The pipeline has
    /// already recorded the error and moved on.
    DestinationConfigRequested {
        data_type: DataType,
    },
    Completed(TaskCompletion),
}

#[derive(Clone, Debug)]
pub struct TaskCompletion {
    pub id: TaskId,
    pub job: JobKind,
    pub state: TaskState,
    pub status: String,
    /// Present only for a successful completion.
    pub record: Option<TaskRecord>,
    pub errors: Vec<TaskError>,
}

/// Shared collaborators and policy handed to task factories. Tasks read
/// configuration from here exclusively; there are no process-wide lookups in
/// pipeline logic.
pub struct TaskContext {
    pub policy: UploadPolicy,
    pub destinations: Arc<DestinationRegistry>,
    pub downloader: Option<Arc<dyn Downloader>>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
}

impl TaskContext {
    pub fn new(policy: UploadPolicy, destinations: Arc<DestinationRegistry>) -> Self {
        Self {
            policy,
            destinations,
            downloader: None,
            ocr: None,
        }
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }
}

/// Identity and inputs of one job. Immutable once the task is constructed;
/// the pipeline works on the task's mutable copy of path/payload/image.
pub struct TaskInfo {
    pub job: JobKind,
    pub data_type: DataType,
    pub file_name: String,
    pub file_path: Option<PathBuf>,
    pub source_url: Option<String>,
    pub text: Option<String>,
    /// When set, a text upload is written here before being sent.
    pub text_file_path: Option<PathBuf>,
    pub payload: Option<Arc<Vec<u8>>>,
    pub image: Option<ImageHandle>,
    pub post_capture_actions: Vec<Arc<dyn PostCaptureAction>>,
    pub post_upload_actions: Vec<Arc<dyn PostUploadAction>>,
    /// Auto-cleanup: remove the capture's source file once the task reaches
    /// a terminal state.
    pub delete_source_when_done: bool,
}

impl TaskInfo {
    pub fn new(job: JobKind, data_type: DataType, file_name: impl Into<String>) -> Self {
        Self {
            job,
            data_type,
            file_name: file_name.into(),
            file_path: None,
            source_url: None,
            text: None,
            text_file_path: None,
            payload: None,
            image: None,
            post_capture_actions: Vec::new(),
            post_upload_actions: Vec::new(),
            delete_source_when_done: false,
        }
    }
}

struct TaskMutable {
    state: TaskState,
    status: String,
    file_path: Option<PathBuf>,
    payload: Option<Arc<Vec<u8>>>,
    image: Option<ImageHandle>,
    keep_image: bool,
    result: UploadResult,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
    upload_duration: Option<Duration>,
}

/// One capture/upload job and its lifecycle:
/// `InQueue -> Preparing -> Working -> {Completed | Failed | Stopping -> Stopped}`.
/// A task reconstructed from history starts terminal and never runs.
pub struct UploadTask {
    id: TaskId,
    info: TaskInfo,
    context: Arc<TaskContext>,
    runner: BackgroundRunner<TaskEvent>,
    stop: StopToken,
    active_uploader: Mutex<Option<Arc<dyn Uploader>>>,
    finalized: AtomicBool,
    done: Notify,
    progress: Arc<Mutex<ProgressSnapshot>>,
    state: Mutex<TaskMutable>,
    history_record: Option<TaskRecord>,
}

impl UploadTask {
    pub fn new(mut info: TaskInfo, context: Arc<TaskContext>) -> Arc<Self> {
        let payload = info.payload.take();
        let image = info.image.take();
        let file_path = info.file_path.clone();

        Arc::new(Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst)),
            info,
            context,
            runner: BackgroundRunner::new(),
            stop: StopToken::new(),
            active_uploader: Mutex::new(None),
            finalized: AtomicBool::new(false),
            done: Notify::new(),
            progress: Arc::new(Mutex::new(ProgressSnapshot::default())),
            state: Mutex::new(TaskMutable {
                state: TaskState::InQueue,
                status: "In queue".to_string(),
                file_path,
                payload,
                image,
                keep_image: false,
                result: UploadResult::new(),
                started_at: None,
                finished_at: None,
                upload_duration: None,
            }),
            history_record: None,
        })
    }

    pub fn from_file(path: impl Into<PathBuf>, context: Arc<TaskContext>) -> Arc<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unnamed")
            .to_string();
        let mut info = TaskInfo::new(JobKind::FileUpload, DataType::from_path(&path), file_name);
        info.file_path = Some(path);
        Self::new(info, context)
    }

    pub fn from_image(
        image: ImageHandle,
        file_name: impl Into<String>,
        context: Arc<TaskContext>,
    ) -> Arc<Self> {
        let mut info = TaskInfo::new(JobKind::Capture, DataType::Image, file_name);
        info.image = Some(image);
        Self::new(info, context)
    }

    pub fn from_text(
        text: impl Into<String>,
        file_name: impl Into<String>,
        context: Arc<TaskContext>,
    ) -> Arc<Self> {
        let mut info = TaskInfo::new(JobKind::TextUpload, DataType::Text, file_name);
        info.text = Some(text.into());
        Self::new(info, context)
    }

    pub fn from_url_shorten(url: impl Into<String>, context: Arc<TaskContext>) -> Arc<Self> {
        let url = url.into();
        let mut info = TaskInfo::new(JobKind::ShortenUrl, DataType::Url, url.clone());
        info.source_url = Some(url);
        Self::new(info, context)
    }

    pub fn from_url_share(url: impl Into<String>, context: Arc<TaskContext>) -> Arc<Self> {
        let url = url.into();
        let mut info = TaskInfo::new(JobKind::ShareUrl, DataType::Url, url.clone());
        info.source_url = Some(url);
        Self::new(info, context)
    }

    pub fn from_download(
        url: impl Into<String>,
        file_name: impl Into<String>,
        upload_after: bool,
        context: Arc<TaskContext>,
    ) -> Arc<Self> {
        let file_name = file_name.into();
        let job = if upload_after {
            JobKind::DownloadUpload
        } else {
            JobKind::Download
        };
        let data_type = DataType::from_path(std::path::Path::new(&file_name));
        let mut info = TaskInfo::new(job, data_type, file_name);
        info.source_url = Some(url.into());
        Self::new(info, context)
    }

    /// Reconstructs a terminal task from a persisted record. It never runs
    /// the pipeline and emits no events.
    pub fn from_record(record: TaskRecord, context: Arc<TaskContext>) -> Arc<Self> {
        let info = TaskInfo::new(record.job, record.data_type, record.file_name.clone());

        Arc::new(Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst)),
            info,
            context,
            runner: BackgroundRunner::new(),
            stop: StopToken::new(),
            active_uploader: Mutex::new(None),
            finalized: AtomicBool::new(true),
            done: Notify::new(),
            progress: Arc::new(Mutex::new(ProgressSnapshot::default())),
            state: Mutex::new(TaskMutable {
                state: TaskState::History,
                status: "History".to_string(),
                file_path: record.file_path.clone(),
                payload: None,
                image: None,
                keep_image: false,
                result: UploadResult::new(),
                started_at: None,
                finished_at: Some(record.completed_at),
                upload_duration: None,
            }),
            history_record: Some(record),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn job(&self) -> JobKind {
        self.info.job
    }

    pub fn data_type(&self) -> DataType {
        self.info.data_type
    }

    pub fn file_name(&self) -> &str {
        &self.info.file_name
    }

    pub fn state(&self) -> TaskState {
        self.lock_state().state
    }

    pub fn status(&self) -> String {
        self.lock_state().status.clone()
    }

    pub fn result(&self) -> UploadResult {
        self.lock_state().result.clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        match self.progress.lock() {
            Ok(slot) => *slot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.lock_state().started_at
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        self.lock_state().finished_at
    }

    pub fn upload_duration(&self) -> Option<Duration> {
        self.lock_state().upload_duration
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_stop_requested()
    }

    pub fn is_working(&self) -> bool {
        self.state().is_working()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn history_record(&self) -> Option<&TaskRecord> {
        self.history_record.as_ref()
    }

    /// Keeps the decoded image alive past finalization, for collaborators
    /// that still need it (completion preview).
    pub fn retain_image(&self) {
        self.lock_state().keep_image = true;
    }

    pub fn image(&self) -> Option<ImageHandle> {
        self.lock_state().image.clone()
    }

    /// The single consumer end of this task's event channel. Yields `Some`
    /// exactly once; the scheduler takes it when the task is submitted.
    pub fn take_events(&self) -> Option<UnboundedReceiver<TaskEvent>> {
        self.runner.take_events()
    }

    /// Moves `InQueue -> Preparing` and schedules the pipeline on the task's
    /// own worker. No-op (returning false) for any other state or when a
    /// stop was already requested.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.stop.is_stop_requested() {
            return false;
        }

        {
            let mut state = self.lock_state();
            if state.state != TaskState::InQueue {
                return false;
            }
            state.state = TaskState::Preparing;
            state.status = "Preparing".to_string();
            state.started_at = Some(SystemTime::now());
            self.emit(TaskEvent::StatusChanged {
                state: TaskState::Preparing,
                status: state.status.clone(),
            });
        }

        let task = self.clone();
        self.runner.start(async move {
            pipeline::run(&task).await;
            task.finalize();
        })
    }

    /// Cooperative cancellation. A queued task finalizes immediately; a
    /// running one is asked to unwind (aborting an in-flight upload) and
    /// finalizes when the pipeline returns.
    pub fn stop(&self) {
        self.stop.request_stop();

        let current = self.state();
        if current.is_terminal() {
            return;
        }

        match current {
            TaskState::InQueue => self.finalize(),
            TaskState::Preparing | TaskState::Working => {
                {
                    let mut state = self.lock_state();
                    if state.state.is_terminal() || state.state == TaskState::Stopping {
                        return;
                    }
                    state.state = TaskState::Stopping;
                    state.status = "Stopping".to_string();
                    self.emit(TaskEvent::StatusChanged {
                        state: TaskState::Stopping,
                        status: state.status.clone(),
                    });
                }
                if let Some(uploader) = self.active_uploader_clone() {
                    uploader.abort();
                }
            }
            _ => {}
        }
    }

    /// Blocks until the task reaches a terminal state.
    pub async fn wait_for_terminal(
        &self,
        timeout_duration: Option<Duration>,
    ) -> TaskResult<TaskState> {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.state();
            if state.is_terminal() {
                return Ok(state);
            }

            match timeout_duration {
                Some(duration) => {
                    if tokio::time::timeout(duration, notified).await.is_err() {
                        let state = self.state();
                        if state.is_terminal() {
                            return Ok(state);
                        }
                        return Err(TaskError::new(
                            TaskErrorKind::Timeout,
                            format!("timed out waiting for task '{}' to finish", self.id.0),
                        ));
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Computes the terminal state, emits the completion event, and releases
    /// owned resources. Idempotent: a second call is a no-op, so a duplicate
    /// completion can never double-report or double-append to history.
    pub(crate) fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let completion = {
            let mut state = self.lock_state();
            let terminal = if self.stop.is_stop_requested() {
                TaskState::Stopped
            } else if state.result.errors.iter().any(|error| is_fatal(error.kind)) {
                TaskState::Failed
            } else {
                TaskState::Completed
            };

            let finished_at = SystemTime::now();
            state.state = terminal;
            state.finished_at = Some(finished_at);
            state.status = match terminal {
                TaskState::Stopped => "Stopped",
                TaskState::Failed => "Failed",
                _ => "Completed",
            }
            .to_string();

            let record = (terminal == TaskState::Completed).then(|| TaskRecord {
                job: self.info.job,
                data_type: self.info.data_type,
                file_name: self.info.file_name.clone(),
                file_path: state.file_path.clone(),
                source_url: self.info.source_url.clone(),
                url: state.result.url.clone(),
                thumbnail_url: state.result.thumbnail_url.clone(),
                deletion_url: state.result.deletion_url.clone(),
                shortened_url: state.result.shortened_url.clone(),
                completed_at: finished_at,
            });

            state.payload = None;
            if !state.keep_image {
                state.image = None;
            }

            TaskCompletion {
                id: self.id,
                job: self.info.job,
                state: terminal,
                status: state.status.clone(),
                record,
                errors: state.result.errors.clone(),
            }
        };

        if self.info.delete_source_when_done
            && self.info.job == JobKind::Capture
            && let Some(path) = &self.info.file_path
            && let Err(error) = std::fs::remove_file(path)
        {
            tracing::warn!(
                task_id = self.id.0,
                path = %path.display(),
                %error,
                "failed to delete capture source file"
            );
        }

        self.emit(TaskEvent::StatusChanged {
            state: completion.state,
            status: completion.status.clone(),
        });
        self.emit(TaskEvent::Completed(completion));
        self.done.notify_waiters();
    }

    // A poisoned lock only means another thread panicked mid-update; the
    // state itself stays coherent because every writer finishes its update
    // before releasing.
    fn lock_state(&self) -> MutexGuard<'_, TaskMutable> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn active_uploader_clone(&self) -> Option<Arc<dyn Uploader>> {
        match self.active_uploader.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn emit(&self, event: TaskEvent) {
        self.runner.sink().emit(event);
    }

    pub(crate) fn event_sink(&self) -> EventSink<TaskEvent> {
        self.runner.sink()
    }

    pub(crate) fn progress_slot(&self) -> Arc<Mutex<ProgressSnapshot>> {
        self.progress.clone()
    }

    pub(crate) fn context(&self) -> &TaskContext {
        &self.context
    }

    pub(crate) fn policy(&self) -> &UploadPolicy {
        &self.context.policy
    }

    pub(crate) fn destinations(&self) -> Arc<DestinationRegistry> {
        self.context.destinations.clone()
    }

    pub(crate) fn source_url(&self) -> Option<String> {
        self.info.source_url.clone()
    }

    pub(crate) fn text(&self) -> Option<String> {
        self.info.text.clone()
    }

    pub(crate) fn text_file_path(&self) -> Option<PathBuf> {
        self.info.text_file_path.clone()
    }

    pub(crate) fn post_capture_actions(&self) -> Vec<Arc<dyn PostCaptureAction>> {
        self.info.post_capture_actions.clone()
    }

    pub(crate) fn post_upload_actions(&self) -> Vec<Arc<dyn PostUploadAction>> {
        self.info.post_upload_actions.clone()
    }

    pub(crate) fn set_payload(&self, payload: Vec<u8>) {
        self.lock_state().payload = Some(Arc::new(payload));
    }

    pub(crate) fn set_file_path(&self, path: PathBuf) {
        self.lock_state().file_path = Some(path);
    }

    pub(crate) fn action_input(&self) -> crate::collaborators::ActionInput {
        let state = self.lock_state();
        crate::collaborators::ActionInput {
            file_path: state.file_path.clone(),
            payload: state.payload.clone(),
            image: state.image.clone(),
        }
    }

    pub(crate) fn apply_action_input(&self, input: crate::collaborators::ActionInput) {
        let mut state = self.lock_state();
        state.file_path = input.file_path;
        state.payload = input.payload;
        state.image = input.image;
    }

    /// Current payload, falling back to reading the file from disk.
    pub(crate) fn upload_payload(&self) -> TaskResult<Arc<Vec<u8>>> {
        let (payload, file_path) = {
            let state = self.lock_state();
            (state.payload.clone(), state.file_path.clone())
        };

        if let Some(payload) = payload {
            return Ok(payload);
        }

        let Some(path) = file_path else {
            return Err(TaskError::new(
                TaskErrorKind::Internal,
                "task has neither a payload nor a file to upload",
            ));
        };

        match std::fs::read(&path) {
            Ok(bytes) => {
                let payload = Arc::new(bytes);
                self.lock_state().payload = Some(payload.clone());
                Ok(payload)
            }
            Err(error) => Err(TaskError::new(
                TaskErrorKind::Storage,
                format!("failed to read '{}': {error}", path.display()),
            )),
        }
    }

    /// Enters `Working` (first time) and updates the phase status text.
    pub(crate) fn set_working_status(&self, status: &str) {
        let mut state = self.lock_state();
        if state.state.is_terminal() {
            return;
        }
        if state.state != TaskState::Stopping {
            state.state = TaskState::Working;
        }
        state.status = status.to_string();
        self.emit(TaskEvent::StatusChanged {
            state: state.state,
            status: state.status.clone(),
        });
    }

    pub(crate) fn record_error(&self, error: TaskError) {
        let error = error.attributed(self.info.job, self.info.data_type);
        self.lock_state().result.push_error(error);
    }

    pub(crate) fn with_result<R>(&self, f: impl FnOnce(&mut UploadResult) -> R) -> R {
        f(&mut self.lock_state().result)
    }

    pub(crate) fn set_upload_duration(&self, duration: Duration) {
        self.lock_state().upload_duration = Some(duration);
    }

    pub(crate) fn set_active_uploader(&self, uploader: Option<Arc<dyn Uploader>>) {
        if let Ok(mut slot) = self.active_uploader.lock() {
            *slot = uploader;
        }
    }
}

/// Ocr and post-upload failures are recorded but never demote an otherwise
/// successful task.
fn is_fatal(kind: TaskErrorKind) -> bool {
    !matches!(kind, TaskErrorKind::Ocr | TaskErrorKind::PostUpload)
}
