use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::migration::descriptor::{resolve, MigrationDescriptor};
use crate::migration::error::{MigrationError, MigrationResult};
use crate::migration::housekeeping::{ensure_indexes, HousekeepingReport};
use crate::migration::state::{self, MigrationDirection, MigrationRecord, MigrationStatus};
use crate::migration::unit::Migration;
use crate::migration::version::MigrationVersion;
use crate::primitives::config::{runner_config, RunnerConfig};
use crate::primitives::RecordId;
use crate::store::{
    MigrationRecordStore, RecordFilter, RecordQuery, RecordSort, RecordStoreError, RecordUpdate,
};
use crate::waypoint_error::AnyhowErrorExt;

/// Why a migration was not executed during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A `Succeeded/Up` record already exists for the version
    AlreadyApplied,
    /// Another instance holds a fresh `Running` record for the version
    HeldByAnotherInstance,
    /// A stale `Running` record was found but could not be marked `Failed`
    StaleRecoveryFailed,
    /// `should_up` or `should_down` returned `false`
    Vetoed,
    /// Another instance inserted its `Running` record first
    LostRace,
    /// A backward run reached a version that was never applied
    NeverApplied,
}

impl SkipReason {
    /// Returns the name used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyApplied => "already_applied",
            Self::HeldByAnotherInstance => "held_by_another_instance",
            Self::StaleRecoveryFailed => "stale_recovery_failed",
            Self::Vetoed => "vetoed",
            Self::LostRace => "lost_race",
            Self::NeverApplied => "never_applied",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bookkeeping write whose failure is reported in [`AuditFailure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOperation {
    /// Marking an abandoned `Running` record as `Failed`
    RecoverStale,
    /// Marking an applied `Up` record as `Succeeded`
    MarkSucceeded,
    /// Marking a failed `Up` record as `Failed`
    MarkFailed,
    /// Inserting the record of a `Down` execution
    InsertReverted,
    /// Marking the `Up` record of a reverted version as `Reverted`
    MarkReverted,
}

impl AuditOperation {
    /// Returns the name used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecoverStale => "recover_stale",
            Self::MarkSucceeded => "mark_succeeded",
            Self::MarkFailed => "mark_failed",
            Self::InsertReverted => "insert_reverted",
            Self::MarkReverted => "mark_reverted",
        }
    }
}

/// A bookkeeping write that failed without changing the outcome of its migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFailure {
    /// Version of the affected migration
    pub version: i32,
    /// Direction being executed
    pub direction: MigrationDirection,
    /// Record the write targeted, if it already existed in the store
    pub record_id: Option<RecordId>,
    /// The write that failed
    pub operation: AuditOperation,
    /// Store error text
    pub message: String,
}

/// Summary of a migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunSummary {
    /// Direction of the run; `None` when the store was already at the target
    pub direction: Option<MigrationDirection>,
    /// Current version before the run
    pub from_version: i32,
    /// Resolved target version
    pub target_version: i32,
    /// Versions applied by this instance, in execution order
    pub applied: Vec<i32>,
    /// Versions reverted by this instance, in execution order
    pub reverted: Vec<i32>,
    /// Versions that were not executed, with the reason
    pub skipped: Vec<(i32, SkipReason)>,
    /// Bookkeeping writes that failed
    pub audit_failures: Vec<AuditFailure>,
    /// What the housekeeping pass before the run changed
    pub housekeeping: HousekeepingReport,
}

impl MigrationRunSummary {
    fn absorb(&mut self, version: i32, execution: UnitExecution) -> MigrationResult<()> {
        self.audit_failures.extend(execution.audit_failures);
        match execution.outcome? {
            UnitOutcome::Applied => self.applied.push(version),
            UnitOutcome::Reverted => self.reverted.push(version),
            UnitOutcome::Skipped(reason) => self.skipped.push((version, reason)),
        }
        Ok(())
    }
}

enum UnitOutcome {
    Applied,
    Reverted,
    Skipped(SkipReason),
}

/// Result of one migration execution: the logical outcome and, separately,
/// the bookkeeping writes that failed along the way
struct UnitExecution {
    outcome: MigrationResult<UnitOutcome>,
    audit_failures: Vec<AuditFailure>,
}

/// Applies and reverts versioned migrations against a shared record store.
///
/// ## Coordination
///
/// Many processes may run the same migrations against the same store at
/// once. There is no in-process or external lock: before running `up`, an
/// instance inserts a `Running` record, and the store's partial unique index
/// on `version` (for `Up` records that are `Running` or `Succeeded`) lets
/// exactly one insert win. Losers skip the version.
///
/// An instance that dies mid-migration leaves its `Running` record behind.
/// Once that record is older than the configured stale threshold, the next
/// run marks it `Failed` and retries the version.
///
/// ## Reverting
///
/// A successful `down` inserts a `Down` record and marks the version's
/// `Succeeded` `Up` record as `Reverted`, releasing the version so a later
/// forward run applies it again. If that mark is lost, the `Down` record alone
/// already counts as the revert and the next housekeeping pass settles the
/// `Up` record.
///
/// ## Failures
///
/// The first failing migration aborts the run with
/// [`MigrationError::MigrationFailed`]; every version before it stays
/// applied and the next run resumes from there. Failed bookkeeping writes
/// never change a migration's outcome and are reported in
/// [`MigrationRunSummary::audit_failures`].
pub struct MigrationRunner {
    store: Arc<dyn MigrationRecordStore>,
    migrations: Vec<MigrationDescriptor>,
    config: RunnerConfig,
}

#[waypoint_macros::log_scope]
impl MigrationRunner {
    /// Create a runner using the process-wide [`runner_config`].
    ///
    /// # Errors
    /// - `MigrationError::InvalidVersion`, `MissingMetadata` or `DuplicateVersions` if
    ///   the migrations are misconfigured
    pub fn new(
        store: Arc<dyn MigrationRecordStore>,
        migrations: Vec<Arc<dyn Migration>>,
    ) -> MigrationResult<Self> {
        Self::with_config(store, migrations, runner_config())
    }

    /// Create a runner with an explicit configuration.
    ///
    /// # Errors
    /// - `MigrationError::InvalidVersion`, `MissingMetadata` or `DuplicateVersions` if
    ///   the migrations are misconfigured
    pub fn with_config(
        store: Arc<dyn MigrationRecordStore>,
        migrations: Vec<Arc<dyn Migration>>,
        config: RunnerConfig,
    ) -> MigrationResult<Self> {
        let migrations = resolve(migrations)?;

        crate::debug!(
            "migration_runner.created migrations={} stale_threshold_secs={}",
            migrations.len(),
            config.stale_running_threshold().num_seconds()
        );

        Ok(Self {
            store,
            migrations,
            config,
        })
    }

    /// Registered migrations, ascending by version
    #[must_use]
    pub fn descriptors(&self) -> &[MigrationDescriptor] {
        &self.migrations
    }

    /// Highest registered version, `0` when no migrations are registered
    #[must_use]
    pub fn highest_known_version(&self) -> i32 {
        self.migrations.last().map_or(0, |descriptor| descriptor.version)
    }

    /// Configuration used by this runner
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

impl MigrationRunner {
    /// Migrate the store to `target`.
    ///
    /// Runs housekeeping first, then compares the target with the current
    /// version (see [`current_version`](Self::current_version)):
    ///
    /// - higher: applies every registered version in `(current, target]`, ascending;
    /// - lower: reverts every applied version in `(target, current]`, descending;
    /// - equal: does nothing.
    ///
    /// A target above the highest registered version is clamped to it.
    /// `cancellation` is checked before each migration starts; a running
    /// migration is never interrupted.
    ///
    /// # Errors
    /// - `MigrationError::InvalidOperation` if `target` is negative
    /// - `MigrationError::Cancelled` if `cancellation` fired before a migration started
    /// - `MigrationError::MigrationFailed` if a migration's `up` or `down` failed
    /// - `MigrationError::Store` if the store failed outside bookkeeping writes
    pub async fn run_to(
        &self,
        target: MigrationVersion,
        cancellation: &CancellationToken,
    ) -> MigrationResult<MigrationRunSummary> {
        if let MigrationVersion::Exact(version) = target {
            if version < 0 {
                return Err(MigrationError::InvalidOperation(format!(
                    "Target version must not be negative, got {version}"
                )));
            }
        }

        let run_start_time = Utc::now();
        let housekeeping = ensure_indexes(self.store.as_ref(), &self.config).await?;

        let applied_versions = self.applied_versions().await?;
        let current = applied_versions.last().copied().unwrap_or(0);
        let highest_known = self.highest_known_version();
        let (target_version, clamped) = target.resolve(highest_known);

        if clamped {
            crate::warn!(
                "migration_run.target_clamped requested={} highest_known={}",
                target,
                highest_known
            );
        }

        let mut summary = MigrationRunSummary {
            from_version: current,
            target_version,
            housekeeping,
            ..MigrationRunSummary::default()
        };

        if target_version == current {
            crate::info!(
                "migration_run.up_to_date version={} timestamp={}",
                current,
                Utc::now().to_rfc3339()
            );
            return Ok(summary);
        }

        let direction = if target_version > current {
            MigrationDirection::Up
        } else {
            MigrationDirection::Down
        };
        summary.direction = Some(direction);

        crate::info!(
            "migration_run.started direction={} from={} to={} timestamp={}",
            direction,
            current,
            target_version,
            run_start_time.to_rfc3339()
        );

        match direction {
            MigrationDirection::Up => {
                let candidates = self
                    .migrations
                    .iter()
                    .filter(|d| d.version > current && d.version <= target_version);
                for descriptor in candidates {
                    ensure_not_cancelled(cancellation, descriptor.version)?;
                    let execution = self.execute(descriptor, MigrationDirection::Up).await;
                    summary.absorb(descriptor.version, execution)?;
                }
            }
            MigrationDirection::Down => {
                let candidates = self
                    .migrations
                    .iter()
                    .rev()
                    .filter(|d| d.version > target_version && d.version <= current);
                for descriptor in candidates {
                    ensure_not_cancelled(cancellation, descriptor.version)?;
                    if !applied_versions.contains(&descriptor.version) {
                        crate::info!(
                            "migration.skipped version={} name={} direction=Down reason={}",
                            descriptor.version,
                            descriptor.name,
                            SkipReason::NeverApplied
                        );
                        summary
                            .skipped
                            .push((descriptor.version, SkipReason::NeverApplied));
                        continue;
                    }
                    let execution = self.execute(descriptor, MigrationDirection::Down).await;
                    summary.absorb(descriptor.version, execution)?;
                }
            }
        }

        crate::info!(
            "migration_run.completed direction={} from={} to={} applied={} reverted={} skipped={} audit_failures={} duration_ms={} timestamp={}",
            direction,
            current,
            target_version,
            summary.applied.len(),
            summary.reverted.len(),
            summary.skipped.len(),
            summary.audit_failures.len(),
            (Utc::now() - run_start_time).num_milliseconds(),
            Utc::now().to_rfc3339()
        );

        Ok(summary)
    }

    /// Migrate to the highest registered version without cancellation.
    ///
    /// # Errors
    /// Same as [`run_to`](Self::run_to).
    pub async fn run_latest(&self) -> MigrationResult<MigrationRunSummary> {
        self.run_to(MigrationVersion::Latest, &CancellationToken::new())
            .await
    }

    /// Highest applied version, `0` if none. Skips housekeeping.
    ///
    /// A version counts as applied while its `Succeeded/Up` record is not
    /// followed by a `Succeeded/Down` record.
    ///
    /// # Errors
    /// - `MigrationError::Store` if the store cannot be read
    pub async fn current_version(&self) -> MigrationResult<i32> {
        Ok(self.applied_versions().await?.last().copied().unwrap_or(0))
    }

    /// Every execution record, oldest first.
    ///
    /// # Errors
    /// - `MigrationError::Store` if the store cannot be read
    pub async fn history(&self) -> MigrationResult<Vec<MigrationRecord>> {
        let records = self
            .store
            .find(&RecordQuery::new(RecordFilter::all()).sort(RecordSort::AppliedAtAscending))
            .await?;
        Ok(records)
    }

    async fn applied_versions(&self) -> MigrationResult<BTreeSet<i32>> {
        let succeeded = self
            .store
            .find(&RecordQuery::new(
                RecordFilter::all().status(MigrationStatus::Succeeded),
            ))
            .await?;
        Ok(state::applied_versions(&succeeded))
    }

    async fn execute(
        &self,
        descriptor: &MigrationDescriptor,
        direction: MigrationDirection,
    ) -> UnitExecution {
        let mut audit_failures = Vec::new();
        let outcome = match direction {
            MigrationDirection::Up => self.execute_up(descriptor, &mut audit_failures).await,
            MigrationDirection::Down => self.execute_down(descriptor, &mut audit_failures).await,
        };

        for failure in &audit_failures {
            crate::error!(
                "migration.audit_write_failed version={} direction={} operation={} record_id={} error={}",
                failure.version,
                failure.direction,
                failure.operation.as_str(),
                failure.record_id.as_ref().map_or("none", RecordId::as_str),
                failure.message
            );
        }

        UnitExecution {
            outcome,
            audit_failures,
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn execute_up(
        &self,
        descriptor: &MigrationDescriptor,
        audit_failures: &mut Vec<AuditFailure>,
    ) -> MigrationResult<UnitOutcome> {
        let version = descriptor.version;
        let store = self.store.as_ref();

        let succeeded = store
            .find(&RecordQuery::new(
                RecordFilter::all()
                    .version(version)
                    .status(MigrationStatus::Succeeded),
            ))
            .await?;
        if state::applied_versions(&succeeded).contains(&version) {
            crate::debug!(
                "migration.skipped version={} name={} direction=Up reason={}",
                version,
                descriptor.name,
                SkipReason::AlreadyApplied
            );
            return Ok(UnitOutcome::Skipped(SkipReason::AlreadyApplied));
        }

        let running = store
            .find(
                &RecordQuery::new(
                    RecordFilter::all()
                        .version(version)
                        .direction(MigrationDirection::Up)
                        .status(MigrationStatus::Running),
                )
                .sort(RecordSort::AppliedAtAscending)
                .limit(1),
            )
            .await?;

        if let Some(holder) = running.into_iter().next() {
            let age = Utc::now() - holder.applied_at;
            if age <= self.config.stale_running_threshold() {
                crate::info!(
                    "migration.skipped version={} name={} direction=Up reason={} holder={} age_ms={}",
                    version,
                    descriptor.name,
                    SkipReason::HeldByAnotherInstance,
                    holder.id,
                    age.num_milliseconds()
                );
                return Ok(UnitOutcome::Skipped(SkipReason::HeldByAnotherInstance));
            }

            let recovery = RecordUpdate::new()
                .status(MigrationStatus::Failed)
                .duration_ms(age.num_milliseconds())
                .error(format!("Recovered stale RUNNING (age {}).", format_age(age)));

            if let Err(e) = store.update_one(&holder.id, &recovery).await {
                audit_failures.push(AuditFailure {
                    version,
                    direction: MigrationDirection::Up,
                    record_id: Some(holder.id),
                    operation: AuditOperation::RecoverStale,
                    message: e.to_string(),
                });
                return Ok(UnitOutcome::Skipped(SkipReason::StaleRecoveryFailed));
            }

            crate::warn!(
                "migration.stale_recovered version={} name={} record_id={} age_ms={}",
                version,
                descriptor.name,
                holder.id,
                age.num_milliseconds()
            );
        }

        if !descriptor.migration.should_up() {
            crate::debug!(
                "migration.skipped version={} name={} direction=Up reason={}",
                version,
                descriptor.name,
                SkipReason::Vetoed
            );
            return Ok(UnitOutcome::Skipped(SkipReason::Vetoed));
        }

        let record = MigrationRecord::started(
            version,
            descriptor.name.clone(),
            descriptor.description.clone(),
            MigrationDirection::Up,
        );

        match store.insert(&record).await {
            Ok(()) => {}
            Err(RecordStoreError::DuplicateKey { index }) => {
                crate::info!(
                    "migration.skipped version={} name={} direction=Up reason={} index={}",
                    version,
                    descriptor.name,
                    SkipReason::LostRace,
                    index
                );
                return Ok(UnitOutcome::Skipped(SkipReason::LostRace));
            }
            Err(e) => return Err(e.into()),
        }

        crate::info!(
            "migration.started version={} name={} direction=Up record_id={} timestamp={}",
            version,
            descriptor.name,
            record.id,
            record.applied_at.to_rfc3339()
        );

        let started = Instant::now();
        let result = descriptor.migration.up().await;
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(()) => {
                let update = RecordUpdate::new()
                    .status(MigrationStatus::Succeeded)
                    .duration_ms(duration_ms)
                    .clear_error();
                if let Err(e) = store.update_one(&record.id, &update).await {
                    audit_failures.push(AuditFailure {
                        version,
                        direction: MigrationDirection::Up,
                        record_id: Some(record.id.clone()),
                        operation: AuditOperation::MarkSucceeded,
                        message: e.to_string(),
                    });
                }
                crate::info!(
                    "migration.succeeded version={} name={} direction=Up duration_ms={}",
                    version,
                    descriptor.name,
                    duration_ms
                );
                Ok(UnitOutcome::Applied)
            }
            Err(e) => {
                let message = e.to_generic_message();
                let update = RecordUpdate::new()
                    .status(MigrationStatus::Failed)
                    .duration_ms(duration_ms)
                    .error(message.clone());
                if let Err(store_error) = store.update_one(&record.id, &update).await {
                    audit_failures.push(AuditFailure {
                        version,
                        direction: MigrationDirection::Up,
                        record_id: Some(record.id.clone()),
                        operation: AuditOperation::MarkFailed,
                        message: store_error.to_string(),
                    });
                }
                crate::error!(
                    "migration.failed version={} name={} direction=Up duration_ms={} error={}",
                    version,
                    descriptor.name,
                    duration_ms,
                    message
                );
                Err(MigrationError::MigrationFailed {
                    version,
                    name: descriptor.name.clone(),
                    direction: MigrationDirection::Up,
                    message,
                })
            }
        }
    }

    async fn execute_down(
        &self,
        descriptor: &MigrationDescriptor,
        audit_failures: &mut Vec<AuditFailure>,
    ) -> MigrationResult<UnitOutcome> {
        let version = descriptor.version;

        if !descriptor.migration.should_down() {
            crate::debug!(
                "migration.skipped version={} name={} direction=Down reason={}",
                version,
                descriptor.name,
                SkipReason::Vetoed
            );
            return Ok(UnitOutcome::Skipped(SkipReason::Vetoed));
        }

        let applied = self
            .store
            .find(&RecordQuery::new(RecordFilter::applied().version(version)))
            .await?;

        // Down records are only persisted once the revert has finished
        let mut record = MigrationRecord::started(
            version,
            descriptor.name.clone(),
            descriptor.description.clone(),
            MigrationDirection::Down,
        );

        crate::info!(
            "migration.started version={} name={} direction=Down timestamp={}",
            version,
            descriptor.name,
            record.applied_at.to_rfc3339()
        );

        let started = Instant::now();
        let result = descriptor.migration.down().await;
        record.duration_ms = elapsed_ms(started);

        let failure_message = match result {
            Ok(()) => {
                record.status = MigrationStatus::Succeeded;
                None
            }
            Err(e) => {
                let message = e.to_generic_message();
                record.status = MigrationStatus::Failed;
                record.error = Some(message.clone());
                Some(message)
            }
        };

        if let Err(e) = self.store.insert(&record).await {
            audit_failures.push(AuditFailure {
                version,
                direction: MigrationDirection::Down,
                record_id: None,
                operation: AuditOperation::InsertReverted,
                message: e.to_string(),
            });
        }

        match failure_message {
            None => {
                let revert = RecordUpdate::new().status(MigrationStatus::Reverted);
                for up_record in applied {
                    if let Err(e) = self.store.update_one(&up_record.id, &revert).await {
                        audit_failures.push(AuditFailure {
                            version,
                            direction: MigrationDirection::Down,
                            record_id: Some(up_record.id),
                            operation: AuditOperation::MarkReverted,
                            message: e.to_string(),
                        });
                    }
                }
                crate::info!(
                    "migration.succeeded version={} name={} direction=Down duration_ms={}",
                    version,
                    descriptor.name,
                    record.duration_ms
                );
                Ok(UnitOutcome::Reverted)
            }
            Some(message) => {
                crate::error!(
                    "migration.failed version={} name={} direction=Down duration_ms={} error={}",
                    version,
                    descriptor.name,
                    record.duration_ms,
                    message
                );
                Err(MigrationError::MigrationFailed {
                    version,
                    name: descriptor.name.clone(),
                    direction: MigrationDirection::Down,
                    message,
                })
            }
        }
    }
}

fn ensure_not_cancelled(cancellation: &CancellationToken, next_version: i32) -> MigrationResult<()> {
    if cancellation.is_cancelled() {
        crate::warn!("migration_run.cancelled next_version={}", next_version);
        return Err(MigrationError::Cancelled { next_version });
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Renders an age as `HH:MM:SS`
fn format_age(age: Duration) -> String {
    let total = age.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
