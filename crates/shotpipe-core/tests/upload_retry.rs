use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shotpipe_core::collaborators::{ProgressSender, Uploader};
use shotpipe_core::config::UploadPolicy;
use shotpipe_core::destinations::DestinationRegistry;
use shotpipe_core::models::{
    DataType, TaskErrorKind, TaskResult, TaskState, UploadOutcome,
};
use shotpipe_core::task::{TaskContext, TaskEvent, UploadTask};

/// Appends its own name to the shared call log on every attempt.
struct LoggingUploader {
    name: &'static str,
    calls: Arc<Mutex<Vec<&'static str>>>,
    fail_first: usize,
    attempts: AtomicUsize,
}

impl LoggingUploader {
    fn new(name: &'static str, calls: Arc<Mutex<Vec<&'static str>>>, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls,
            fail_first,
            attempts: AtomicUsize::new(0),
        })
    }
}

impl Uploader for LoggingUploader {
    fn upload(
        &self,
        _payload: &[u8],
        file_name: &str,
        _progress: ProgressSender,
    ) -> TaskResult<UploadOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(self.name);
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Ok(UploadOutcome {
                errors: vec![format!("{} rejected the payload", self.name)],
                ..UploadOutcome::default()
            });
        }
        Ok(UploadOutcome {
            url: Some(format!("https://{}.example/{file_name}", self.name)),
            ..UploadOutcome::default()
        })
    }

    fn abort(&self) {}
}

fn policy(retries: u32, use_secondary: bool) -> UploadPolicy {
    UploadPolicy {
        max_fail_retries: retries,
        use_secondary_uploaders: use_secondary,
        retry_backoff: Duration::from_millis(5),
        uploads_enabled: true,
    }
}

#[tokio::test]
async fn failover_walks_each_secondary_once() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = DestinationRegistry::new()
        .register("primary", LoggingUploader::new("primary", calls.clone(), usize::MAX))
        .register("backup-1", LoggingUploader::new("backup-1", calls.clone(), usize::MAX))
        .register("backup-2", LoggingUploader::new("backup-2", calls.clone(), usize::MAX))
        .primary(DataType::Text, "primary")
        .secondaries(DataType::Text, ["backup-1", "backup-2"]);

    let context = Arc::new(TaskContext::new(policy(2, true), Arc::new(registry)));
    let task = UploadTask::from_text("payload", "note.txt", context);

    assert!(task.start());
    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(state, TaskState::Failed);
    assert_eq!(*calls.lock().unwrap(), ["primary", "backup-1", "backup-2"]);

    let errors = task.result().errors;
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|error| error.kind == TaskErrorKind::Upload));
    assert!(errors[0].message.contains("'primary'"));
    assert!(errors[2].message.contains("'backup-2'"));
}

#[tokio::test]
async fn retries_hit_the_same_destination_when_failover_is_disabled() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = DestinationRegistry::new()
        .register("primary", LoggingUploader::new("primary", calls.clone(), usize::MAX))
        .register("backup-1", LoggingUploader::new("backup-1", calls.clone(), usize::MAX))
        .primary(DataType::Text, "primary")
        .secondaries(DataType::Text, ["backup-1"]);

    let context = Arc::new(TaskContext::new(policy(1, false), Arc::new(registry)));
    let task = UploadTask::from_text("payload", "note.txt", context);

    assert!(task.start());
    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(state, TaskState::Failed);
    assert_eq!(*calls.lock().unwrap(), ["primary", "primary"]);
}

#[tokio::test]
async fn extra_retries_clamp_to_the_last_secondary() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = DestinationRegistry::new()
        .register("primary", LoggingUploader::new("primary", calls.clone(), usize::MAX))
        .register("backup-1", LoggingUploader::new("backup-1", calls.clone(), usize::MAX))
        .primary(DataType::Text, "primary")
        .secondaries(DataType::Text, ["backup-1"]);

    let context = Arc::new(TaskContext::new(policy(3, true), Arc::new(registry)));
    let task = UploadTask::from_text("payload", "note.txt", context);

    assert!(task.start());
    task.wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        ["primary", "backup-1", "backup-1", "backup-1"]
    );
}

#[tokio::test]
async fn successful_retry_completes_and_supersedes_earlier_failures() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = DestinationRegistry::new()
        .register("primary", LoggingUploader::new("primary", calls.clone(), 1))
        .primary(DataType::Text, "primary");

    let context = Arc::new(TaskContext::new(policy(1, false), Arc::new(registry)));
    let task = UploadTask::from_text("payload", "note.txt", context);

    assert!(task.start());
    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(state, TaskState::Completed);
    assert_eq!(*calls.lock().unwrap(), ["primary", "primary"]);

    let result = task.result();
    assert_eq!(
        result.url.as_deref(),
        Some("https://primary.example/note.txt")
    );
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn unconfigured_destination_fails_without_touching_uploaders() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = DestinationRegistry::new()
        .register("images-only", LoggingUploader::new("images-only", calls.clone(), 0))
        .primary(DataType::Image, "images-only");

    let context = Arc::new(TaskContext::new(policy(2, true), Arc::new(registry)));
    let task = UploadTask::from_text("payload", "note.txt", context);
    let mut receiver = task.take_events().unwrap();

    assert!(task.start());
    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(state, TaskState::Failed);
    assert!(calls.lock().unwrap().is_empty());

    let errors = task.result().errors;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, TaskErrorKind::Configuration);
    assert!(errors[0].message.contains("text"));

    let mut saw_config_request = false;
    while let Ok(event) = receiver.try_recv() {
        if let TaskEvent::DestinationConfigRequested { data_type } = event {
            assert_eq!(data_type, DataType::Text);
            saw_config_request = true;
        }
    }
    assert!(saw_config_request);
}

#[tokio::test]
async fn file_name_filters_redirect_before_the_primary() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = DestinationRegistry::new()
        .register("primary", LoggingUploader::new("primary", calls.clone(), 0))
        .register("logs", LoggingUploader::new("logs", calls.clone(), 0))
        .primary(DataType::Text, "primary")
        .filter("*.log", "logs");

    let context = Arc::new(TaskContext::new(policy(0, false), Arc::new(registry)));
    let task = UploadTask::from_text("payload", "crash.LOG", context);

    assert!(task.start());
    let state = task
        .wait_for_terminal(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(state, TaskState::Completed);
    assert_eq!(*calls.lock().unwrap(), ["logs"]);
}
