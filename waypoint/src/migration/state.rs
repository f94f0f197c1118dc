use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::primitives::RecordId;

/// Direction a migration record was executed in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MigrationDirection {
    /// Forward application (`up`)
    Up,
    /// Reversal (`down`)
    Down,
}

impl MigrationDirection {
    /// Returns the persisted name of the direction
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
        }
    }
}

impl std::fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a single execution attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MigrationStatus {
    /// The attempt is in progress (or its owner died before finishing)
    Running,
    /// The attempt completed successfully
    Succeeded,
    /// The attempt failed, or was abandoned and later recovered
    Failed,
    /// The `Up` attempt succeeded and was later undone by a successful `Down`
    Reverted,
}

impl MigrationStatus {
    /// Returns the persisted name of the status
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Reverted => "Reverted",
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted record of one execution attempt of a migration.
///
/// `Up` records are inserted as [`MigrationStatus::Running`] before the
/// migration starts and updated in place when it finishes. `Down` records are
/// inserted once, after the revert, with their final status; a successful
/// revert also moves the version's `Succeeded` `Up` record to
/// [`MigrationStatus::Reverted`] so the version can be applied again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// Unique identifier of the record
    pub id: RecordId,

    /// Version of the migration this attempt executed
    pub version: i32,

    /// Name of the migration
    pub name: String,

    /// Optional description of the migration
    pub description: Option<String>,

    /// When the attempt started
    pub applied_at: DateTime<Utc>,

    /// How long the attempt took, in milliseconds
    pub duration_ms: i64,

    /// Direction of the attempt
    pub direction: MigrationDirection,

    /// Current status of the attempt
    pub status: MigrationStatus,

    /// Error text, set only when the attempt failed
    pub error: Option<String>,
}

impl MigrationRecord {
    /// Creates a `Running` record stamped with the current time and a fresh id.
    #[must_use]
    pub fn started(
        version: i32,
        name: impl Into<String>,
        description: Option<String>,
        direction: MigrationDirection,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            version,
            name: name.into(),
            description,
            applied_at: Utc::now(),
            duration_ms: 0,
            direction,
            status: MigrationStatus::Running,
            error: None,
        }
    }

    /// Whether this record counts towards the current version
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.direction == MigrationDirection::Up && self.status == MigrationStatus::Succeeded
    }
}

/// `Succeeded/Up` records followed by a later `Succeeded/Down` of the same version.
///
/// A successful revert moves the `Up` record to `Reverted`. One that is still
/// `Succeeded` here lost that write and must not count as applied.
pub(crate) fn superseded_by_revert(records: &[MigrationRecord]) -> Vec<&MigrationRecord> {
    let mut latest_revert: HashMap<i32, DateTime<Utc>> = HashMap::new();
    for record in records.iter().filter(|record| {
        record.direction == MigrationDirection::Down && record.status == MigrationStatus::Succeeded
    }) {
        latest_revert
            .entry(record.version)
            .and_modify(|at| *at = (*at).max(record.applied_at))
            .or_insert(record.applied_at);
    }

    records
        .iter()
        .filter(|record| {
            record.is_applied()
                && latest_revert
                    .get(&record.version)
                    .is_some_and(|reverted_at| *reverted_at > record.applied_at)
        })
        .collect()
}

/// Versions applied according to `records`, the `Succeeded` records of both directions
pub(crate) fn applied_versions(records: &[MigrationRecord]) -> BTreeSet<i32> {
    let superseded: Vec<&RecordId> = superseded_by_revert(records)
        .into_iter()
        .map(|record| &record.id)
        .collect();

    records
        .iter()
        .filter(|record| record.is_applied() && !superseded.contains(&&record.id))
        .map(|record| record.version)
        .collect()
}
