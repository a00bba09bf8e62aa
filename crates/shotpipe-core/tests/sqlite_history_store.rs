use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use shotpipe_core::models::{DataType, JobKind, TaskErrorKind, TaskRecord};
use shotpipe_core::persistence::{HistoryStore, MigrationStore};
use shotpipe_core::sqlite::{SqliteHistoryStore, current_schema_version};

fn test_db_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("shotpipe-{name}-{nanos}.sqlite"))
}

fn record(file_name: &str, completed_at_secs: u64) -> TaskRecord {
    TaskRecord {
        job: JobKind::FileUpload,
        data_type: DataType::Image,
        file_name: file_name.to_string(),
        file_path: Some(PathBuf::from(format!("/tmp/{file_name}"))),
        source_url: None,
        url: Some(format!("https://img.example/{file_name}")),
        thumbnail_url: Some(format!("https://img.example/t/{file_name}")),
        deletion_url: None,
        shortened_url: None,
        completed_at: UNIX_EPOCH + Duration::from_secs(completed_at_secs),
    }
}

#[test]
fn migrate_then_round_trip_newest_first() {
    let path = test_db_path("roundtrip");
    let store = SqliteHistoryStore::new(&path);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.append(&record("a.png", 1_700_000_000)).unwrap();
    store.append(&record("b.png", 1_700_000_100)).unwrap();
    store.append(&record("c.png", 1_700_000_200)).unwrap();

    let recent = store.recent(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].file_name, "c.png");
    assert_eq!(recent[1].file_name, "b.png");
    assert_eq!(recent[0].job, JobKind::FileUpload);
    assert_eq!(recent[0].data_type, DataType::Image);
    assert_eq!(
        recent[0].completed_at,
        UNIX_EPOCH + Duration::from_secs(1_700_000_200)
    );

    assert!(store.recent(0).unwrap().is_empty());

    let _ = std::fs::remove_file(path);
}

#[test]
fn ties_on_completion_time_fall_back_to_insertion_order() {
    let path = test_db_path("ties");
    let store = SqliteHistoryStore::new(&path);
    store.migrate_to_latest().unwrap();

    store.append(&record("first.png", 1_700_000_000)).unwrap();
    store.append(&record("second.png", 1_700_000_000)).unwrap();

    let recent = store.recent(10).unwrap();
    assert_eq!(recent[0].file_name, "second.png");
    assert_eq!(recent[1].file_name, "first.png");

    let _ = std::fs::remove_file(path);
}

#[test]
fn append_before_migration_is_a_storage_error() {
    let path = test_db_path("unmigrated");
    let store = SqliteHistoryStore::new(&path);

    let error = store.append(&record("a.png", 1_700_000_000)).unwrap_err();
    assert_eq!(error.kind, TaskErrorKind::Storage);

    let _ = std::fs::remove_file(path);
}

#[test]
fn reapplying_the_current_version_is_idempotent() {
    let path = test_db_path("idempotent");
    let store = SqliteHistoryStore::new(&path);

    store.migrate_to_latest().unwrap();
    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.append(&record("a.png", 1_700_000_000)).unwrap();
    assert_eq!(store.recent(10).unwrap().len(), 1);

    let _ = std::fs::remove_file(path);
}

#[test]
fn downgrade_drops_the_schema() {
    let path = test_db_path("downgrade");
    let store = SqliteHistoryStore::new(&path);

    store.migrate_to_latest().unwrap();
    store.append(&record("a.png", 1_700_000_000)).unwrap();

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);
    assert!(store.recent(10).is_err());

    let _ = std::fs::remove_file(path);
}

#[test]
fn invalid_migration_targets_are_rejected() {
    let path = test_db_path("invalid-target");
    let store = SqliteHistoryStore::new(&path);

    assert!(store.apply_migration(-1).is_err());
    assert!(store.apply_migration(current_schema_version() + 1).is_err());

    let _ = std::fs::remove_file(path);
}

#[test]
fn planned_migrations_lists_only_newer_versions() {
    let store = SqliteHistoryStore::new(test_db_path("planned"));

    let all = store.planned_migrations(0);
    assert_eq!(all.len() as i64, current_schema_version());
    assert!(store.planned_migrations(current_schema_version()).is_empty());
}
