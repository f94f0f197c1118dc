use std::sync::Arc;

mod common;
use common::{recording_set, CallLog};

use chrono::Duration;
use serial_test::serial;
use waypoint::migration::MigrationRunner;
use waypoint::primitives::config::{init_runner_config, runner_config, RunnerConfig};
use waypoint::store::InMemoryRecordStore;

#[test]
#[serial]
fn test_global_config_is_set_once_and_used_by_new() {
    let configured = RunnerConfig::default()
        .with_stale_running_threshold(Duration::minutes(20))
        .with_legacy_index("version_status_idx");

    init_runner_config(configured.clone());
    assert_eq!(runner_config(), configured);

    // A second initialization is ignored
    init_runner_config(RunnerConfig::default());
    assert_eq!(runner_config(), configured);

    let log = CallLog::new();
    let runner = MigrationRunner::new(
        Arc::new(InMemoryRecordStore::new()),
        recording_set(&[1], &log),
    )
    .unwrap();
    assert_eq!(runner.config(), &configured);
}

#[tokio::test]
#[serial]
async fn test_explicit_config_overrides_global() {
    let log = CallLog::new();
    let explicit = RunnerConfig::default()
        .with_stale_running_threshold(Duration::seconds(30))
        .with_legacy_indexes(vec![]);

    let runner = MigrationRunner::with_config(
        Arc::new(InMemoryRecordStore::new()),
        recording_set(&[1], &log),
        explicit.clone(),
    )
    .unwrap();

    assert_eq!(runner.config(), &explicit);
    let summary = runner.run_latest().await.unwrap();
    assert!(summary.housekeeping.dropped_indexes.is_empty());
}
