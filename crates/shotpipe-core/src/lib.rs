pub mod collaborators;
pub mod config;
pub mod destinations;
pub mod history;
pub mod models;
pub mod persistence;
pub mod runner;
pub mod scheduler;
pub mod sqlite;
pub mod task;

/// Installs the process-wide tracing subscriber. Filter comes from
/// `SHOTPIPE_LOG` (falling back to `info`); repeat calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("SHOTPIPE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
