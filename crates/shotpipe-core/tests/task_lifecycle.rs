use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use shotpipe_core::collaborators::{ProgressSender, Uploader};
use shotpipe_core::config::UploadPolicy;
use shotpipe_core::destinations::DestinationRegistry;
use shotpipe_core::models::{
    DataType, JobKind, ProgressSnapshot, TaskRecord, TaskResult, TaskState, UploadOutcome,
};
use shotpipe_core::task::{TaskContext, TaskEvent, UploadTask};

/// Blocks inside `upload` until released. `abort` is the release hook, the
/// same way a real transfer would be torn down.
struct GatedUploader {
    started: AtomicBool,
    release: AtomicBool,
}

impl Uploader for GatedUploader {
    fn upload(
        &self,
        _payload: &[u8],
        _file_name: &str,
        _progress: ProgressSender,
    ) -> TaskResult<UploadOutcome> {
        self.started.store(true, Ordering::SeqCst);
        while !self.release.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(UploadOutcome {
            errors: vec!["transfer aborted".to_string()],
            ..UploadOutcome::default()
        })
    }

    fn abort(&self) {
        self.release.store(true, Ordering::SeqCst);
    }
}

struct ProgressReportingUploader;

impl Uploader for ProgressReportingUploader {
    fn upload(
        &self,
        payload: &[u8],
        file_name: &str,
        progress: ProgressSender,
    ) -> TaskResult<UploadOutcome> {
        progress.report(ProgressSnapshot {
            transferred: payload.len() as u64,
            total: Some(payload.len() as u64),
        });
        Ok(UploadOutcome {
            url: Some(format!("https://files.example/{file_name}")),
            ..UploadOutcome::default()
        })
    }

    fn abort(&self) {}
}

fn text_context(uploader: Arc<dyn Uploader>) -> Arc<TaskContext> {
    let registry = DestinationRegistry::new()
        .register("stub", uploader)
        .primary(DataType::Text, "stub");
    Arc::new(TaskContext::new(
        UploadPolicy {
            max_fail_retries: 0,
            retry_backoff: Duration::from_millis(5),
            ..UploadPolicy::default()
        },
        Arc::new(registry),
    ))
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn drain_events(
    receiver: &mut tokio::sync::mpsc::UnboundedReceiver<TaskEvent>,
) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn stopping_a_queued_task_goes_straight_to_stopped() {
    let context = text_context(Arc::new(ProgressReportingUploader));
    let task = UploadTask::from_text("payload", "note.txt", context);
    let mut events = task.take_events().unwrap();

    task.stop();
    assert_eq!(task.state(), TaskState::Stopped);
    assert!(!task.start());

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        TaskEvent::StatusChanged {
            state: TaskState::Stopped,
            ..
        }
    ));
    match &events[1] {
        TaskEvent::Completed(done) => {
            assert_eq!(done.state, TaskState::Stopped);
            assert!(done.record.is_none());
        }
        other => panic!("expected completion event, got {other:?}"),
    }
}

#[tokio::test]
async fn stop_during_upload_ends_stopped_despite_recorded_errors() {
    let uploader = Arc::new(GatedUploader {
        started: AtomicBool::new(false),
        release: AtomicBool::new(false),
    });
    let context = text_context(uploader.clone());
    let task = UploadTask::from_text("payload", "note.txt", context);
    let mut events = task.take_events().unwrap();

    assert!(task.start());
    assert!(wait_until(Duration::from_secs(2), || {
        uploader.started.load(Ordering::SeqCst)
    })
    .await);

    task.stop();
    task.stop();

    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(state, TaskState::Stopped);
    assert!(!task.result().errors.is_empty());

    let completions = drain_events(&mut events)
        .into_iter()
        .filter(|event| matches!(event, TaskEvent::Completed(_)))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn starting_twice_runs_the_pipeline_once() {
    let calls = Arc::new(AtomicUsize::new(0));

    struct CallCounter(Arc<AtomicUsize>);
    impl Uploader for CallCounter {
        fn upload(
            &self,
            _payload: &[u8],
            file_name: &str,
            _progress: ProgressSender,
        ) -> TaskResult<UploadOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(UploadOutcome {
                url: Some(format!("https://files.example/{file_name}")),
                ..UploadOutcome::default()
            })
        }
        fn abort(&self) {}
    }

    let context = text_context(Arc::new(CallCounter(calls.clone())));
    let task = UploadTask::from_text("payload", "note.txt", context);

    assert!(task.start());
    assert!(!task.start());

    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(state, TaskState::Completed);
    assert!(!task.start());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn events_arrive_in_lifecycle_order() {
    let context = text_context(Arc::new(ProgressReportingUploader));
    let task = UploadTask::from_text("payload", "note.txt", context);
    let mut receiver = task.take_events().unwrap();

    assert!(task.start());
    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(state, TaskState::Completed);

    let events = drain_events(&mut receiver);
    assert!(matches!(
        events[0],
        TaskEvent::StatusChanged {
            state: TaskState::Preparing,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        TaskEvent::StatusChanged {
            state: TaskState::Working,
            ..
        }
    ));
    assert!(matches!(events[2], TaskEvent::UploadStarted { .. }));
    assert!(matches!(events[3], TaskEvent::UploadProgress(_)));
    assert!(matches!(events[4], TaskEvent::UploadCompleted { .. }));
    assert!(matches!(
        events[5],
        TaskEvent::StatusChanged {
            state: TaskState::Completed,
            ..
        }
    ));
    match &events[6] {
        TaskEvent::Completed(done) => {
            assert_eq!(done.state, TaskState::Completed);
            let record = done.record.as_ref().unwrap();
            assert_eq!(record.url.as_deref(), Some("https://files.example/note.txt"));
        }
        other => panic!("expected completion event, got {other:?}"),
    }
    assert_eq!(events.len(), 7);
}

#[tokio::test]
async fn history_reconstruction_is_terminal_and_inert() {
    let record = TaskRecord {
        job: JobKind::Capture,
        data_type: DataType::Image,
        file_name: "shot.png".to_string(),
        file_path: None,
        source_url: None,
        url: Some("https://img.example/shot.png".to_string()),
        thumbnail_url: None,
        deletion_url: None,
        shortened_url: None,
        completed_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
    };
    let context = text_context(Arc::new(ProgressReportingUploader));
    let task = UploadTask::from_record(record, context);
    let mut receiver = task.take_events().unwrap();

    assert_eq!(task.state(), TaskState::History);
    assert!(task.is_terminal());
    assert!(!task.start());
    task.stop();
    assert_eq!(task.state(), TaskState::History);

    assert!(drain_events(&mut receiver).is_empty());
    assert_eq!(
        task.history_record().unwrap().url.as_deref(),
        Some("https://img.example/shot.png")
    );
    assert_eq!(
        task.finished_at(),
        Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    );
}
