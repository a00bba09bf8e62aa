use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;

use crate::collaborators::ProgressSender;
use crate::destinations::DestinationId;
use crate::models::{JobKind, TaskError, TaskErrorKind, TaskResult};
use crate::task::{TaskEvent, UploadTask};

/// One pass over the task's work, short-circuiting on failure or
/// cancellation. Every failure is recorded on the result; nothing is thrown
/// past this boundary, the worker has no supervisor to catch it.
pub(crate) async fn run(task: &Arc<UploadTask>) {
    if task.stop_requested() {
        return;
    }

    if task.job().downloads() && !download(task).await {
        return;
    }
    if task.stop_requested() {
        return;
    }

    if !run_post_capture_actions(task).await {
        return;
    }
    if task.stop_requested() {
        return;
    }

    if task.job() == JobKind::TextUpload && !materialize_text(task) {
        return;
    }

    run_ocr(task).await;
    if task.stop_requested() {
        return;
    }

    if task.job().rewrites_url() {
        seed_url_result(task);
    } else if task.job().uploads() {
        if task.policy().uploads_enabled {
            upload_step(task).await;
        } else {
            task.with_result(|result| result.is_url_expected = false);
        }
    } else {
        // Plain download: the payload is the product, no URL will exist.
        task.with_result(|result| result.is_url_expected = false);
    }
    if task.stop_requested() {
        return;
    }

    run_post_upload_actions(task).await;
}

async fn download(task: &Arc<UploadTask>) -> bool {
    let Some(url) = task.source_url() else {
        task.record_error(TaskError::new(
            TaskErrorKind::Download,
            "download job has no source url",
        ));
        return false;
    };
    let Some(downloader) = task.context().downloader.clone() else {
        task.record_error(TaskError::new(
            TaskErrorKind::Configuration,
            "no downloader is configured",
        ));
        return false;
    };

    task.set_working_status("Downloading");

    let joined = tokio::task::spawn_blocking(move || downloader.download(&url)).await;
    match join_flatten(joined, "download") {
        Ok(bytes) => {
            task.set_payload(bytes);
            true
        }
        Err(error) => {
            task.record_error(error);
            false
        }
    }
}

async fn run_post_capture_actions(task: &Arc<UploadTask>) -> bool {
    let actions = task.post_capture_actions();
    if actions.is_empty() {
        return true;
    }

    let mut input = task.action_input();
    for action in actions {
        if task.stop_requested() {
            return false;
        }

        let name = action.name().to_string();
        let current = input.clone();
        let joined = tokio::task::spawn_blocking(move || action.run(current)).await;
        match join_flatten(joined, "post-capture action") {
            Ok(next) if next.has_artifact() => input = next,
            Ok(_) => {
                task.record_error(TaskError::new(
                    TaskErrorKind::PostCapture,
                    format!("post-capture action '{name}' produced no artifact"),
                ));
                return false;
            }
            Err(error) => {
                task.record_error(error);
                return false;
            }
        }
    }

    task.apply_action_input(input);
    true
}

fn materialize_text(task: &Arc<UploadTask>) -> bool {
    let Some(text) = task.text() else {
        task.record_error(TaskError::new(
            TaskErrorKind::PostCapture,
            "text upload has no text payload",
        ));
        return false;
    };

    if let Some(path) = task.text_file_path() {
        if let Err(error) = std::fs::write(&path, &text) {
            task.record_error(TaskError::new(
                TaskErrorKind::Storage,
                format!("failed to write text to '{}': {error}", path.display()),
            ));
            return false;
        }
        task.set_file_path(path);
    }

    task.set_payload(text.into_bytes());
    true
}

/// Best effort: a recognition failure is recorded but never fails the task.
async fn run_ocr(task: &Arc<UploadTask>) {
    let Some(ocr) = task.context().ocr.clone() else {
        return;
    };
    if task.data_type() != crate::models::DataType::Image {
        return;
    }
    let Some(image) = task.image() else {
        return;
    };

    let joined = tokio::task::spawn_blocking(move || ocr.recognize(&image)).await;
    match join_flatten(joined, "ocr") {
        Ok(text) => task.with_result(|result| result.ocr_text = Some(text)),
        Err(error) => {
            let error = TaskError::new(TaskErrorKind::Ocr, error.message);
            task.record_error(error);
        }
    }
}

fn seed_url_result(task: &Arc<UploadTask>) {
    match task.source_url() {
        Some(url) => task.with_result(|result| result.url = Some(url)),
        None => task.record_error(TaskError::new(
            TaskErrorKind::Internal,
            "url job has no source url",
        )),
    }
}

/// Upload with retry/failover. Total attempts = 1 + retry budget. With
/// secondaries enabled a failed attempt advances to the next failover
/// destination immediately; otherwise the same destination is retried after
/// a fixed backoff. Every attempt's errors accumulate on the result.
async fn upload_step(task: &Arc<UploadTask>) {
    let payload = match task.upload_payload() {
        Ok(payload) => payload,
        Err(error) => {
            task.record_error(error);
            return;
        }
    };

    task.set_working_status("Uploading");

    let registry = task.destinations();
    let policy = task.policy();
    let use_secondary = policy.use_secondary_uploaders;
    let backoff = policy.retry_backoff;
    let attempts = policy.max_fail_retries.saturating_add(1);
    let data_type = task.data_type();
    let file_name = task.file_name().to_string();
    let failover = use_secondary && registry.has_secondaries(data_type);

    let mut started_emitted = false;
    let mut last_duration = Duration::ZERO;

    for attempt in 0..attempts {
        if task.stop_requested() {
            break;
        }

        let destination =
            match registry.resolve_for_attempt(data_type, &file_name, attempt, use_secondary) {
                Ok(destination) => destination,
                Err(error) => {
                    task.record_error(error);
                    task.emit(TaskEvent::DestinationConfigRequested { data_type });
                    break;
                }
            };

        if !started_emitted {
            task.emit(TaskEvent::UploadStarted {
                destination: destination.id.clone(),
                file_name: file_name.clone(),
            });
            started_emitted = true;
        }

        task.set_active_uploader(Some(destination.uploader.clone()));

        let uploader = destination.uploader.clone();
        let attempt_payload = payload.clone();
        let attempt_file_name = file_name.clone();
        let progress = ProgressSender::new(task.event_sink(), task.progress_slot());

        let started = Instant::now();
        let joined = tokio::task::spawn_blocking(move || {
            uploader.upload(&attempt_payload, &attempt_file_name, progress)
        })
        .await;
        last_duration = started.elapsed();

        task.set_active_uploader(None);
        task.set_upload_duration(last_duration);

        match join_flatten(joined, "upload") {
            Ok(outcome) if outcome.is_success() => {
                // A successful attempt supersedes earlier attempt failures.
                task.with_result(|result| {
                    result
                        .errors
                        .retain(|error| error.kind != TaskErrorKind::Upload);
                    result.absorb_outcome(outcome);
                });
                break;
            }
            Ok(outcome) => {
                if outcome.errors.is_empty() {
                    task.record_error(upload_error(
                        &destination.id,
                        "uploader returned no result url",
                    ));
                } else {
                    for message in outcome.errors {
                        task.record_error(upload_error(&destination.id, &message));
                    }
                }
            }
            Err(error) => task.record_error(error),
        }

        if task.stop_requested() || attempt + 1 >= attempts {
            break;
        }
        if !failover {
            tokio::time::sleep(backoff).await;
        }
    }

    if started_emitted {
        task.emit(TaskEvent::UploadCompleted {
            duration: last_duration,
        });
    }
}

async fn run_post_upload_actions(task: &Arc<UploadTask>) {
    let actions = task.post_upload_actions();
    if actions.is_empty() || !task.with_result(|result| result.has_url()) {
        return;
    }

    for action in actions {
        if task.stop_requested() {
            return;
        }

        let name = action.name().to_string();
        let snapshot = task.with_result(|result| result.clone());
        let joined = tokio::task::spawn_blocking(move || {
            let mut result = snapshot;
            action.run(&mut result).map(|_| result)
        })
        .await;

        match join_flatten(joined, "post-upload action") {
            Ok(updated) => task.with_result(|result| {
                result.url = updated.url;
                result.thumbnail_url = updated.thumbnail_url;
                result.deletion_url = updated.deletion_url;
                result.shortened_url = updated.shortened_url;
            }),
            Err(error) => {
                // Recorded, but never reverts the successful upload.
                task.record_error(TaskError::new(
                    TaskErrorKind::PostUpload,
                    format!("post-upload action '{name}' failed: {}", error.message),
                ));
            }
        }
    }
}

fn upload_error(destination: &DestinationId, message: &str) -> TaskError {
    TaskError::new(
        TaskErrorKind::Upload,
        format!("upload to '{destination}' failed: {message}"),
    )
}

fn join_flatten<T>(joined: Result<TaskResult<T>, JoinError>, step: &str) -> TaskResult<T> {
    match joined {
        Ok(result) => result,
        Err(join_error) => Err(TaskError::new(
            TaskErrorKind::Internal,
            format!("{step} worker join failure: {join_error}"),
        )),
    }
}
