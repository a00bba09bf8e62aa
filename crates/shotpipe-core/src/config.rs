use std::time::Duration;

/// Scheduler-level knobs, passed in at construction. There is no ambient
/// settings singleton; everything the scheduler and tasks read comes from
/// these structs.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneously working tasks. Zero means unlimited.
    pub upload_limit: usize,
    pub save_history: bool,
    /// When set, only records that carry a URL are written to history.
    pub history_requires_url: bool,
    pub recent_history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            upload_limit: 5,
            save_history: true,
            history_requires_url: true,
            recent_history_limit: 10,
        }
    }
}

/// Per-task upload behavior. Shared by every task built from the same
/// `TaskContext`.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    /// Retries after the first failed attempt; total attempts = 1 + retries.
    pub max_fail_retries: u32,
    /// Advance to the configured secondary destinations on retry instead of
    /// waiting out the backoff against the same destination.
    pub use_secondary_uploaders: bool,
    /// Fixed wait between retries against the same destination.
    pub retry_backoff: Duration,
    pub uploads_enabled: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_fail_retries: 1,
            use_secondary_uploaders: false,
            retry_backoff: Duration::from_secs(1),
            uploads_enabled: true,
        }
    }
}
