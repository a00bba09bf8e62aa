use std::sync::{Arc, Mutex, MutexGuard};

use crate::collaborators::{
    DestinationConfigPrompt, NotificationCue, NotificationPlayer, SettingsAutosave,
};
use crate::config::SchedulerConfig;
use crate::history::RecentHistory;
use crate::models::{TaskError, TaskErrorKind, TaskId, TaskResult, TaskState};
use crate::persistence::HistoryStore;
use crate::task::{TaskCompletion, TaskEvent, UploadTask};

/// Process-wide task registry and admission control. Holds every live task
/// in submission order, bounds how many may work at once, and turns terminal
/// events into side effects: logging, notification, history, autosave.
pub struct TaskScheduler {
    config: SchedulerConfig,
    registry: Mutex<Vec<Arc<UploadTask>>>,
    recent: Arc<RecentHistory>,
    history_store: Option<Arc<dyn HistoryStore>>,
    /// Serializes persistent history writes across tasks.
    history_write_lock: tokio::sync::Mutex<()>,
    notifications: Option<Arc<dyn NotificationPlayer>>,
    autosave: Option<Arc<dyn SettingsAutosave>>,
    config_prompt: Option<Arc<dyn DestinationConfigPrompt>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let recent = Arc::new(RecentHistory::new(config.recent_history_limit));
        Self {
            config,
            registry: Mutex::new(Vec::new()),
            recent,
            history_store: None,
            history_write_lock: tokio::sync::Mutex::new(()),
            notifications: None,
            autosave: None,
            config_prompt: None,
        }
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn with_notifications(mut self, player: Arc<dyn NotificationPlayer>) -> Self {
        self.notifications = Some(player);
        self
    }

    pub fn with_autosave(mut self, autosave: Arc<dyn SettingsAutosave>) -> Self {
        self.autosave = Some(autosave);
        self
    }

    pub fn with_config_prompt(mut self, prompt: Arc<dyn DestinationConfigPrompt>) -> Self {
        self.config_prompt = Some(prompt);
        self
    }

    pub fn recent_history(&self) -> Arc<RecentHistory> {
        self.recent.clone()
    }

    /// Registers the task, wires its events to this scheduler's handlers,
    /// and admits queued work. History reconstructions are registered only.
    pub fn submit(self: &Arc<Self>, task: Arc<UploadTask>) -> TaskResult<()> {
        self.lock_registry()?.push(task.clone());

        if task.state() == TaskState::History {
            return Ok(());
        }

        if let Some(mut events) = task.take_events() {
            let scheduler = self.clone();
            let observed = task.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    scheduler.handle_event(&observed, event).await;
                }
            });
        }

        self.admit_queued()
    }

    /// Starts queued tasks up to the upload limit, oldest submission first.
    /// The registry lock makes this a critical section: concurrent terminal
    /// events cannot over-admit past the limit.
    pub fn admit_queued(&self) -> TaskResult<()> {
        let registry = self.lock_registry()?;
        let limit = self.config.upload_limit;
        let mut working = registry
            .iter()
            .filter(|task| task.is_working())
            .count();

        for task in registry.iter() {
            if limit != 0 && working >= limit {
                break;
            }
            if task.state() == TaskState::InQueue && task.start() {
                working += 1;
            }
        }

        Ok(())
    }

    /// Requests cancellation of every live task without waiting for drain.
    pub fn stop_all(&self) -> TaskResult<()> {
        let tasks = self.lock_registry()?.clone();
        for task in tasks {
            task.stop();
        }
        Ok(())
    }

    /// Stops and deregisters one task. Callers must not rely on further
    /// events from it.
    pub fn remove(&self, task_id: TaskId) -> TaskResult<()> {
        let removed = {
            let mut registry = self.lock_registry()?;
            match registry.iter().position(|task| task.id() == task_id) {
                Some(index) => Some(registry.remove(index)),
                None => None,
            }
        };

        if let Some(task) = removed {
            task.stop();
        }
        Ok(())
    }

    pub fn is_busy(&self) -> TaskResult<bool> {
        Ok(self
            .lock_registry()?
            .iter()
            .any(|task| !task.is_terminal()))
    }

    pub fn tasks(&self) -> TaskResult<Vec<Arc<UploadTask>>> {
        Ok(self.lock_registry()?.clone())
    }

    async fn handle_event(self: &Arc<Self>, task: &Arc<UploadTask>, event: TaskEvent) {
        match event {
            TaskEvent::StatusChanged { state, status } => {
                tracing::debug!(task_id = task.id().0, ?state, %status, "task status changed");
            }
            TaskEvent::UploadStarted {
                destination,
                file_name,
            } => {
                tracing::info!(
                    task_id = task.id().0,
                    %destination,
                    %file_name,
                    "upload started"
                );
            }
            TaskEvent::UploadProgress(progress) => {
                tracing::trace!(
                    task_id = task.id().0,
                    transferred = progress.transferred,
                    total = progress.total,
                    "upload progress"
                );
            }
            TaskEvent::UploadCompleted { duration } => {
                tracing::debug!(task_id = task.id().0, ?duration, "upload finished");
            }
            TaskEvent::DestinationConfigRequested { data_type } => {
                tracing::warn!(
                    task_id = task.id().0,
                    data_type = data_type.as_str(),
                    "destination configuration requested"
                );
                if let Some(prompt) = &self.config_prompt {
                    prompt.request(data_type);
                }
            }
            TaskEvent::Completed(completion) => {
                self.on_task_completed(task, completion).await;
            }
        }
    }

    async fn on_task_completed(self: &Arc<Self>, task: &Arc<UploadTask>, done: TaskCompletion) {
        match done.state {
            TaskState::Completed => {
                tracing::info!(
                    task_id = done.id.0,
                    job = done.job.as_str(),
                    file_name = task.file_name(),
                    "task completed"
                );
            }
            TaskState::Stopped => {
                tracing::info!(
                    task_id = done.id.0,
                    job = done.job.as_str(),
                    "task stopped"
                );
            }
            _ => {
                let messages: Vec<String> =
                    done.errors.iter().map(ToString::to_string).collect();
                tracing::error!(
                    task_id = done.id.0,
                    job = done.job.as_str(),
                    errors = ?messages,
                    "task failed"
                );
            }
        }

        if let Some(player) = &self.notifications {
            player.play(match done.state {
                TaskState::Completed => NotificationCue::TaskCompleted,
                TaskState::Stopped => NotificationCue::TaskStopped,
                _ => NotificationCue::TaskFailed,
            });
        }

        if done.state == TaskState::Completed
            && self.config.save_history
            && let Some(record) = done.record
            && (record.has_url() || !self.config.history_requires_url)
        {
            if let Err(error) = self.recent.add(record.clone()) {
                tracing::error!(task_id = done.id.0, %error, "failed to update recent history");
            }

            if let Some(store) = &self.history_store {
                let _guard = self.history_write_lock.lock().await;
                let store = store.clone();
                let joined =
                    tokio::task::spawn_blocking(move || store.append(&record)).await;
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::error!(task_id = done.id.0, %error, "failed to persist history record");
                    }
                    Err(join_error) => {
                        tracing::error!(
                            task_id = done.id.0,
                            %join_error,
                            "history persistence join failure"
                        );
                    }
                }
            }
        }

        if let Err(error) = self.admit_queued() {
            tracing::error!(%error, "failed to admit queued tasks");
        }

        match self.is_busy() {
            Ok(false) => {
                if let Some(autosave) = &self.autosave {
                    autosave.request_save();
                }
            }
            Ok(true) => {}
            Err(error) => tracing::error!(%error, "failed to check scheduler idleness"),
        }
    }

    fn lock_registry(&self) -> TaskResult<MutexGuard<'_, Vec<Arc<UploadTask>>>> {
        self.registry.lock().map_err(|_| {
            TaskError::new(TaskErrorKind::Internal, "task registry mutex poisoned")
        })
    }
}
