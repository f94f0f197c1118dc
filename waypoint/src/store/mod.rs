//! Persistence interface for migration records.
//!
//! The runner never talks to a database directly. It consumes the
//! [`MigrationRecordStore`] capability set: an insert that fails distinctly on
//! uniqueness violations, filtered queries, point updates, bulk deletes and
//! index management. Any store with unique-constraint or conditional-put
//! semantics can implement it (a document collection with partial indexes, a
//! relational table with a filtered unique index, ...).

use async_trait::async_trait;
use thiserror::Error;

use crate::migration::{MigrationDirection, MigrationRecord, MigrationStatus};
use crate::primitives::RecordId;

mod memory;

pub use memory::InMemoryRecordStore;

/// Errors reported by a [`MigrationRecordStore`]
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordStoreError {
    /// A write would violate a unique index
    #[error("duplicate key violates unique index {index}")]
    DuplicateKey {
        /// Name of the violated index
        index: String,
    },
    /// The record addressed by an update does not exist
    #[error("record not found")]
    NotFound,
    /// An index with the same name but a different definition already exists
    #[error("index {name} already exists with a different definition")]
    IndexConflict {
        /// Name of the conflicting index
        name: String,
    },
    /// The store could not be reached or rejected the operation
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Record selector. Unset fields match every record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Match records of this version
    pub version: Option<i32>,
    /// Match records executed in this direction
    pub direction: Option<MigrationDirection>,
    /// Match records whose status is one of these
    pub statuses: Option<Vec<MigrationStatus>>,
}

impl RecordFilter {
    /// A filter matching every record
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the filter to one version
    #[must_use]
    pub fn version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    /// Restricts the filter to one direction
    #[must_use]
    pub fn direction(mut self, direction: MigrationDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Restricts the filter to one status
    #[must_use]
    pub fn status(self, status: MigrationStatus) -> Self {
        self.statuses(vec![status])
    }

    /// Restricts the filter to a set of statuses
    #[must_use]
    pub fn statuses(mut self, statuses: Vec<MigrationStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// `Up` records with status `Succeeded`, the records defining the current version
    #[must_use]
    pub fn applied() -> Self {
        Self::all()
            .direction(MigrationDirection::Up)
            .status(MigrationStatus::Succeeded)
    }

    /// Whether `record` satisfies every set field
    #[must_use]
    pub fn matches(&self, record: &MigrationRecord) -> bool {
        self.version.is_none_or(|version| record.version == version)
            && self
                .direction
                .is_none_or(|direction| record.direction == direction)
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&record.status))
    }
}

/// Ordering applied to query results
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordSort {
    /// Oldest `applied_at` first
    AppliedAtAscending,
    /// Newest `applied_at` first
    AppliedAtDescending,
}

/// A filtered, optionally sorted and limited query
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordQuery {
    /// Records to select
    pub filter: RecordFilter,
    /// Result ordering; store order when unset
    pub sort: Option<RecordSort>,
    /// Maximum number of records returned
    pub limit: Option<usize>,
}

impl RecordQuery {
    /// A query for every record matching `filter`
    #[must_use]
    pub fn new(filter: RecordFilter) -> Self {
        Self {
            filter,
            sort: None,
            limit: None,
        }
    }

    /// Sets the result ordering
    #[must_use]
    pub fn sort(mut self, sort: RecordSort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the maximum number of results
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Field changes applied by [`MigrationRecordStore::update_one`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    /// New status
    pub status: Option<MigrationStatus>,
    /// New duration in milliseconds
    pub duration_ms: Option<i64>,
    /// New error: `Some(None)` clears it, `Some(Some(_))` sets it
    pub error: Option<Option<String>>,
}

impl RecordUpdate {
    /// An update that changes nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status
    #[must_use]
    pub fn status(mut self, status: MigrationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the duration
    #[must_use]
    pub fn duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the error text
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    /// Clears the error text
    #[must_use]
    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    /// Applies the changes to `record`
    pub fn apply_to(&self, record: &mut MigrationRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(duration_ms) = self.duration_ms {
            record.duration_ms = duration_ms;
        }
        if let Some(error) = &self.error {
            record.error.clone_from(error);
        }
    }
}

/// Record field an index is keyed on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexField {
    /// [`MigrationRecord::version`]
    Version,
    /// [`MigrationRecord::direction`]
    Direction,
    /// [`MigrationRecord::status`]
    Status,
}

/// Definition of an index on the migration record collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, unique within the collection
    pub name: String,
    /// Indexed fields, in key order
    pub fields: Vec<IndexField>,
    /// Whether keys must be unique among indexed records
    pub unique: bool,
    /// Only records matching this filter are indexed (partial index)
    pub partial_filter: Option<RecordFilter>,
}

impl IndexSpec {
    /// A non-unique index over `fields`
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<IndexField>) -> Self {
        Self {
            name: name.into(),
            fields,
            unique: false,
            partial_filter: None,
        }
    }

    /// Makes the index unique
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Restricts the index to records matching `filter`
    #[must_use]
    pub fn partial(mut self, filter: RecordFilter) -> Self {
        self.partial_filter = Some(filter);
        self
    }

    /// Whether `record` is covered by this index
    #[must_use]
    pub fn covers(&self, record: &MigrationRecord) -> bool {
        self.partial_filter
            .as_ref()
            .is_none_or(|filter| filter.matches(record))
    }
}

/// Persistence for migration execution records.
///
/// Implementations must make [`insert`](Self::insert) and
/// [`update_one`](Self::update_one) atomic with respect to the unique indexes
/// created through [`create_indexes`](Self::create_indexes): that guarantee is
/// the only mutual exclusion the runner relies on across processes.
#[allow(clippy::module_name_repetitions)]
#[async_trait]
pub trait MigrationRecordStore: Send + Sync {
    /// Insert a record
    ///
    /// # Errors
    /// - `RecordStoreError::DuplicateKey` if the record violates a unique index
    /// - other variants for any other failure
    async fn insert(&self, record: &MigrationRecord) -> Result<(), RecordStoreError>;

    /// Find records matching a query
    ///
    /// # Errors
    /// - `RecordStoreError::Unavailable` if the store cannot be read
    async fn find(&self, query: &RecordQuery) -> Result<Vec<MigrationRecord>, RecordStoreError>;

    /// Apply `update` to the record identified by `id`
    ///
    /// # Errors
    /// - `RecordStoreError::NotFound` if no record has this id
    /// - `RecordStoreError::DuplicateKey` if the updated record violates a unique index
    async fn update_one(&self, id: &RecordId, update: &RecordUpdate) -> Result<(), RecordStoreError>;

    /// Delete every record whose id is in `ids`, returning how many were deleted
    ///
    /// # Errors
    /// - `RecordStoreError::Unavailable` if the store cannot be written
    async fn delete_many(&self, ids: &[RecordId]) -> Result<u64, RecordStoreError>;

    /// List the indexes defined on the collection
    ///
    /// # Errors
    /// - `RecordStoreError::Unavailable` if the store cannot be read
    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, RecordStoreError>;

    /// Create indexes; creating an index identical to an existing one is a no-op
    ///
    /// # Errors
    /// - `RecordStoreError::IndexConflict` if a same-named index has another definition
    /// - `RecordStoreError::DuplicateKey` if existing records violate a new unique index
    async fn create_indexes(&self, specs: &[IndexSpec]) -> Result<(), RecordStoreError>;

    /// Drop an index by name; dropping a missing index is not an error
    ///
    /// # Errors
    /// - `RecordStoreError::Unavailable` if the store cannot be written
    async fn drop_index(&self, name: &str) -> Result<(), RecordStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: i32, direction: MigrationDirection, status: MigrationStatus) -> MigrationRecord {
        let mut record = MigrationRecord::started(version, "Test", None, direction);
        record.status = status;
        record
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = RecordFilter::all();
        assert!(filter.matches(&record(1, MigrationDirection::Up, MigrationStatus::Running)));
        assert!(filter.matches(&record(9, MigrationDirection::Down, MigrationStatus::Failed)));
    }

    #[test]
    fn test_filter_fields_combine() {
        let filter = RecordFilter::all()
            .version(2)
            .direction(MigrationDirection::Up)
            .statuses(vec![MigrationStatus::Running, MigrationStatus::Succeeded]);

        assert!(filter.matches(&record(2, MigrationDirection::Up, MigrationStatus::Running)));
        assert!(filter.matches(&record(2, MigrationDirection::Up, MigrationStatus::Succeeded)));
        assert!(!filter.matches(&record(2, MigrationDirection::Up, MigrationStatus::Failed)));
        assert!(!filter.matches(&record(2, MigrationDirection::Down, MigrationStatus::Running)));
        assert!(!filter.matches(&record(3, MigrationDirection::Up, MigrationStatus::Running)));
    }

    #[test]
    fn test_update_sets_and_clears_error() {
        let mut target = record(1, MigrationDirection::Up, MigrationStatus::Running);

        RecordUpdate::new()
            .status(MigrationStatus::Failed)
            .duration_ms(40)
            .error("boom")
            .apply_to(&mut target);
        assert_eq!(target.status, MigrationStatus::Failed);
        assert_eq!(target.duration_ms, 40);
        assert_eq!(target.error.as_deref(), Some("boom"));

        RecordUpdate::new().clear_error().apply_to(&mut target);
        assert!(target.error.is_none());
        assert_eq!(target.status, MigrationStatus::Failed);
    }

    #[test]
    fn test_partial_index_coverage() {
        let index = IndexSpec::new("uniq", vec![IndexField::Version])
            .unique()
            .partial(RecordFilter::applied());

        assert!(index.covers(&record(1, MigrationDirection::Up, MigrationStatus::Succeeded)));
        assert!(!index.covers(&record(1, MigrationDirection::Up, MigrationStatus::Failed)));
        assert!(IndexSpec::new("plain", vec![IndexField::Version])
            .covers(&record(1, MigrationDirection::Down, MigrationStatus::Failed)));
    }
}
