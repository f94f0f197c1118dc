use std::collections::HashSet;

use chrono::Utc;

use crate::migration::error::MigrationResult;
use crate::migration::state::{superseded_by_revert, MigrationDirection, MigrationStatus};
use crate::primitives::config::RunnerConfig;
use crate::primitives::RecordId;
use crate::store::{
    IndexField, IndexSpec, MigrationRecordStore, RecordFilter, RecordQuery, RecordSort,
    RecordUpdate,
};

/// Compound index backing history lookups by version, direction and status
pub const INDEX_VERSION_DIRECTION_STATUS: &str = "version_direction_status_idx";

/// Plain index on version
pub const INDEX_VERSION: &str = "version_idx";

/// Partial unique index that serializes `Up` attempts across instances
pub const INDEX_UNIQUE_UP_RUNNING_OR_SUCCEEDED: &str = "uniq_up_running_or_succeeded";

/// Outcome of a housekeeping pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Reverted `Up` records still marked `Succeeded` that were moved to `Reverted`
    pub reverts_settled: u64,
    /// Number of duplicate `Succeeded/Up` records deleted
    pub duplicates_removed: u64,
    /// Legacy indexes that were present and dropped
    pub dropped_indexes: Vec<String>,
    /// Required indexes that were missing and created
    pub created_indexes: Vec<String>,
}

impl HousekeepingReport {
    /// Whether the pass changed nothing
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.reverts_settled == 0
            && self.duplicates_removed == 0
            && self.dropped_indexes.is_empty()
            && self.created_indexes.is_empty()
    }
}

/// Indexes the runner depends on
#[must_use]
pub fn required_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new(
            INDEX_VERSION_DIRECTION_STATUS,
            vec![IndexField::Version, IndexField::Direction, IndexField::Status],
        ),
        IndexSpec::new(INDEX_VERSION, vec![IndexField::Version]),
        IndexSpec::new(INDEX_UNIQUE_UP_RUNNING_OR_SUCCEEDED, vec![IndexField::Version])
            .unique()
            .partial(
                RecordFilter::all()
                    .direction(MigrationDirection::Up)
                    .statuses(vec![MigrationStatus::Running, MigrationStatus::Succeeded]),
            ),
    ]
}

/// Reconciles the record collection with what the runner expects.
///
/// 1. Moves `Succeeded/Up` records followed by a `Succeeded/Down` of the same
///    version to `Reverted`. Failures are logged and ignored.
/// 2. Collapses duplicate `Succeeded/Up` records per version, keeping the earliest.
/// 3. Drops the configured legacy indexes that are present. Failures are logged and ignored.
/// 4. Creates whichever of the [`required_indexes`] are missing.
///
/// Deduplication runs before index creation because the unique index cannot
/// be built over duplicated data. Safe to run repeatedly.
///
/// # Errors
/// - `MigrationError::Store` if the history cannot be read, or deduplication,
///   index listing or index creation fails
pub async fn ensure_indexes(
    store: &dyn MigrationRecordStore,
    config: &RunnerConfig,
) -> MigrationResult<HousekeepingReport> {
    let reverts_settled = settle_reverts(store).await?;
    let duplicates_removed = remove_duplicate_successes(store).await?;

    let existing: HashSet<String> = store
        .list_indexes()
        .await?
        .into_iter()
        .map(|index| index.name)
        .collect();

    let mut dropped_indexes = Vec::new();
    for legacy in config.legacy_index_names() {
        if !existing.contains(legacy) {
            continue;
        }
        match store.drop_index(legacy).await {
            Ok(()) => {
                crate::info!("housekeeping.legacy_index_dropped name={}", legacy);
                dropped_indexes.push(legacy.clone());
            }
            Err(e) => {
                crate::warn!(
                    "housekeeping.legacy_index_drop_failed name={} error={}",
                    legacy,
                    e
                );
            }
        }
    }

    let missing: Vec<IndexSpec> = required_indexes()
        .into_iter()
        .filter(|index| !existing.contains(&index.name))
        .collect();
    if !missing.is_empty() {
        store.create_indexes(&missing).await?;
    }
    let created_indexes: Vec<String> = missing.into_iter().map(|index| index.name).collect();

    let report = HousekeepingReport {
        reverts_settled,
        duplicates_removed,
        dropped_indexes,
        created_indexes,
    };

    if report.is_noop() {
        crate::debug!("housekeeping.completed changes=none");
    } else {
        crate::info!(
            "housekeeping.completed reverts_settled={} duplicates_removed={} dropped_indexes={:?} created_indexes={:?} timestamp={}",
            report.reverts_settled,
            report.duplicates_removed,
            report.dropped_indexes,
            report.created_indexes,
            Utc::now().to_rfc3339()
        );
    }

    Ok(report)
}

/// Marks `Up` records whose revert already succeeded as `Reverted`
async fn settle_reverts(store: &dyn MigrationRecordStore) -> MigrationResult<u64> {
    let succeeded = store
        .find(&RecordQuery::new(
            RecordFilter::all().status(MigrationStatus::Succeeded),
        ))
        .await?;

    let mut settled = 0;
    let revert = RecordUpdate::new().status(MigrationStatus::Reverted);
    for record in superseded_by_revert(&succeeded) {
        match store.update_one(&record.id, &revert).await {
            Ok(()) => {
                crate::info!(
                    "housekeeping.revert_settled version={} record_id={}",
                    record.version,
                    record.id
                );
                settled += 1;
            }
            Err(e) => {
                crate::warn!(
                    "housekeeping.revert_settle_failed version={} record_id={} error={}",
                    record.version,
                    record.id,
                    e
                );
            }
        }
    }
    Ok(settled)
}

/// Deletes every `Succeeded/Up` record except the earliest per version
async fn remove_duplicate_successes(store: &dyn MigrationRecordStore) -> MigrationResult<u64> {
    let applied = store
        .find(&RecordQuery::new(RecordFilter::applied()).sort(RecordSort::AppliedAtAscending))
        .await?;

    let mut kept = HashSet::new();
    let redundant: Vec<RecordId> = applied
        .into_iter()
        .filter(|record| !kept.insert(record.version))
        .map(|record| record.id)
        .collect();

    if redundant.is_empty() {
        return Ok(0);
    }

    let removed = store.delete_many(&redundant).await?;
    crate::warn!(
        "housekeeping.duplicates_removed count={} requested={}",
        removed,
        redundant.len()
    );
    Ok(removed)
}
