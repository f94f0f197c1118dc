use std::sync::{Arc, Mutex, OnceLock};

mod common;
use common::{recording_set, CallLog};

use chrono::{Duration, Utc};
use serial_test::serial;
use waypoint::migration::{
    CancellationToken, MigrationDirection, MigrationRecord, MigrationRunner, MigrationVersion,
};
use waypoint::primitives::logger::{set_logger, LogLevel, Logger};
use waypoint::store::{InMemoryRecordStore, MigrationRecordStore};

#[derive(Default)]
struct CapturingLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl CapturingLogger {
    fn messages(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().unwrap().clone()
    }

    fn contains(&self, level: LogLevel, prefix: &str) -> bool {
        self.messages()
            .iter()
            .any(|(l, message)| *l == level && message.starts_with(prefix))
    }
}

impl Logger for CapturingLogger {
    fn log(&self, level: LogLevel, message: String) {
        self.lines.lock().unwrap().push((level, message));
    }
}

/// The sink is process-global, so every test shares the one installed first
fn host_logger() -> Arc<CapturingLogger> {
    static LOGGER: OnceLock<Arc<CapturingLogger>> = OnceLock::new();
    LOGGER
        .get_or_init(|| {
            let logger = Arc::new(CapturingLogger::default());
            set_logger(logger.clone());
            logger
        })
        .clone()
}

#[tokio::test]
#[serial]
async fn test_runner_events_reach_host_logger() {
    let logger = host_logger();
    // Installing a second sink is harmless and keeps the first
    set_logger(Arc::new(CapturingLogger::default()));

    let log = CallLog::new();
    let runner = MigrationRunner::new(
        Arc::new(InMemoryRecordStore::new()),
        recording_set(&[1], &log),
    )
    .unwrap();
    runner.run_latest().await.unwrap();

    assert!(logger.contains(
        LogLevel::Info,
        "migration.succeeded version=1 name=Recording1 direction=Up"
    ));
    assert!(logger.contains(LogLevel::Info, "migration_run.completed direction=Up"));

    // Synchronous runner methods carry the type as context
    assert!(logger.contains(LogLevel::Debug, "[MigrationRunner] migration_runner.created"));
}

#[tokio::test]
#[serial]
async fn test_clamped_target_is_warned() {
    let logger = host_logger();

    let log = CallLog::new();
    let runner = MigrationRunner::new(
        Arc::new(InMemoryRecordStore::new()),
        recording_set(&[1, 2], &log),
    )
    .unwrap();
    let summary = runner
        .run_to(MigrationVersion::Exact(99), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.target_version, 2);
    assert!(logger.contains(
        LogLevel::Warn,
        "migration_run.target_clamped requested=99 highest_known=2"
    ));
}

#[tokio::test]
#[serial]
async fn test_stale_recovery_is_warned() {
    let logger = host_logger();

    let store = Arc::new(InMemoryRecordStore::new());
    let mut abandoned =
        MigrationRecord::started(7, "Recording7", None, MigrationDirection::Up);
    abandoned.applied_at = Utc::now() - Duration::minutes(9);
    store.insert(&abandoned).await.unwrap();

    let log = CallLog::new();
    let runner = MigrationRunner::new(store, recording_set(&[7], &log)).unwrap();
    let summary = runner.run_latest().await.unwrap();

    assert_eq!(summary.applied, vec![7]);
    assert!(logger.contains(
        LogLevel::Warn,
        &format!(
            "migration.stale_recovered version=7 name=Recording7 record_id={}",
            abandoned.id
        )
    ));
}
