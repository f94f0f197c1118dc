use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    IndexField, IndexSpec, MigrationRecordStore, RecordQuery, RecordSort, RecordStoreError,
    RecordUpdate,
};
use crate::migration::MigrationRecord;
use crate::primitives::RecordId;

/// Name reported when two records share an id
const PRIMARY_KEY_INDEX: &str = "_id_";

/// In-process [`MigrationRecordStore`].
///
/// Enforces unique and partial unique indexes on insert, update and index
/// creation the way a document database does, which makes it a faithful
/// stand-in for tests and a usable store for single-node deployments that
/// keep their history elsewhere.
///
/// All operations take one lock, so every call is atomic with respect to the
/// others.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    records: Vec<MigrationRecord>,
    indexes: Vec<IndexSpec>,
}

impl InMemoryRecordStore {
    /// Creates an empty store without indexes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, in insertion order
    #[must_use]
    pub fn records(&self) -> Vec<MigrationRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Mutations never panic halfway, so a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn index_key(fields: &[IndexField], record: &MigrationRecord) -> Vec<String> {
    fields
        .iter()
        .map(|field| match field {
            IndexField::Version => record.version.to_string(),
            IndexField::Direction => record.direction.as_str().to_string(),
            IndexField::Status => record.status.as_str().to_string(),
        })
        .collect()
}

/// Returns the first unique index `candidate` would violate against `others`
fn violated_index<'a>(
    indexes: &[IndexSpec],
    candidate: &MigrationRecord,
    others: impl Iterator<Item = &'a MigrationRecord> + Clone,
) -> Option<String> {
    indexes
        .iter()
        .filter(|index| index.unique && index.covers(candidate))
        .find(|index| {
            let key = index_key(&index.fields, candidate);
            others
                .clone()
                .any(|other| index.covers(other) && index_key(&index.fields, other) == key)
        })
        .map(|index| index.name.clone())
}

/// Whether records already stored would violate a new unique index
fn has_existing_duplicates(index: &IndexSpec, records: &[MigrationRecord]) -> bool {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .filter(|record| index.covers(record))
        .any(|record| !seen.insert(index_key(&index.fields, record)))
}

#[async_trait]
impl MigrationRecordStore for InMemoryRecordStore {
    async fn insert(&self, record: &MigrationRecord) -> Result<(), RecordStoreError> {
        let mut state = self.lock();

        if state.records.iter().any(|existing| existing.id == record.id) {
            return Err(RecordStoreError::DuplicateKey {
                index: PRIMARY_KEY_INDEX.to_string(),
            });
        }
        if let Some(index) = violated_index(&state.indexes, record, state.records.iter()) {
            return Err(RecordStoreError::DuplicateKey { index });
        }

        state.records.push(record.clone());
        Ok(())
    }

    async fn find(&self, query: &RecordQuery) -> Result<Vec<MigrationRecord>, RecordStoreError> {
        let state = self.lock();

        let mut found: Vec<MigrationRecord> = state
            .records
            .iter()
            .filter(|record| query.filter.matches(record))
            .cloned()
            .collect();

        match query.sort {
            Some(RecordSort::AppliedAtAscending) => found.sort_by_key(|record| record.applied_at),
            Some(RecordSort::AppliedAtDescending) => {
                found.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
            }
            None => {}
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }

        Ok(found)
    }

    async fn update_one(&self, id: &RecordId, update: &RecordUpdate) -> Result<(), RecordStoreError> {
        let mut state = self.lock();

        let position = state
            .records
            .iter()
            .position(|record| &record.id == id)
            .ok_or(RecordStoreError::NotFound)?;

        let mut updated = state.records[position].clone();
        update.apply_to(&mut updated);

        let others = state.records.iter().filter(|record| &record.id != id);
        if let Some(index) = violated_index(&state.indexes, &updated, others) {
            return Err(RecordStoreError::DuplicateKey { index });
        }

        state.records[position] = updated;
        Ok(())
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<u64, RecordStoreError> {
        let mut state = self.lock();

        let before = state.records.len();
        state.records.retain(|record| !ids.contains(&record.id));
        let deleted = before - state.records.len();

        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, RecordStoreError> {
        Ok(self.lock().indexes.clone())
    }

    async fn create_indexes(&self, specs: &[IndexSpec]) -> Result<(), RecordStoreError> {
        let mut state = self.lock();

        let mut staged: Vec<IndexSpec> = Vec::new();
        for spec in specs {
            let existing = state
                .indexes
                .iter()
                .chain(staged.iter())
                .find(|index| index.name == spec.name);
            match existing {
                Some(index) if index == spec => continue,
                Some(_) => {
                    return Err(RecordStoreError::IndexConflict {
                        name: spec.name.clone(),
                    })
                }
                None => {}
            }

            if spec.unique && has_existing_duplicates(spec, &state.records) {
                return Err(RecordStoreError::DuplicateKey {
                    index: spec.name.clone(),
                });
            }
            staged.push(spec.clone());
        }

        state.indexes.extend(staged);
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<(), RecordStoreError> {
        self.lock().indexes.retain(|index| index.name != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{MigrationDirection, MigrationStatus};
    use crate::store::RecordFilter;
    use chrono::{Duration, Utc};

    fn unique_up_index() -> IndexSpec {
        IndexSpec::new("uniq_up", vec![IndexField::Version])
            .unique()
            .partial(
                RecordFilter::all()
                    .direction(MigrationDirection::Up)
                    .statuses(vec![MigrationStatus::Running, MigrationStatus::Succeeded]),
            )
    }

    fn up_record(version: i32) -> MigrationRecord {
        MigrationRecord::started(version, "Test", None, MigrationDirection::Up)
    }

    #[tokio::test]
    async fn test_partial_unique_index_rejects_second_running_record() {
        let store = InMemoryRecordStore::new();
        store.create_indexes(&[unique_up_index()]).await.unwrap();

        store.insert(&up_record(1)).await.unwrap();
        let result = store.insert(&up_record(1)).await;

        assert_eq!(
            result,
            Err(RecordStoreError::DuplicateKey {
                index: "uniq_up".to_string()
            })
        );
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_unique_index_ignores_uncovered_records() {
        let store = InMemoryRecordStore::new();
        store.create_indexes(&[unique_up_index()]).await.unwrap();

        let mut failed = up_record(1);
        failed.status = MigrationStatus::Failed;
        store.insert(&failed).await.unwrap();
        store.insert(&up_record(1)).await.unwrap();
        store
            .insert(&MigrationRecord::started(1, "Test", None, MigrationDirection::Down))
            .await
            .unwrap();

        assert_eq!(store.records().len(), 3);
    }

    #[tokio::test]
    async fn test_update_that_violates_unique_index_is_rejected() {
        let store = InMemoryRecordStore::new();
        store.create_indexes(&[unique_up_index()]).await.unwrap();

        let mut failed = up_record(1);
        failed.status = MigrationStatus::Failed;
        store.insert(&failed).await.unwrap();
        store.insert(&up_record(1)).await.unwrap();

        let result = store
            .update_one(&failed.id, &RecordUpdate::new().status(MigrationStatus::Succeeded))
            .await;
        assert!(matches!(result, Err(RecordStoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn test_update_unknown_record_is_not_found() {
        let store = InMemoryRecordStore::new();
        let result = store
            .update_one(&RecordId::generate(), &RecordUpdate::new().duration_ms(1))
            .await;
        assert_eq!(result, Err(RecordStoreError::NotFound));
    }

    #[tokio::test]
    async fn test_creating_unique_index_over_duplicates_fails() {
        let store = InMemoryRecordStore::new();
        let mut first = up_record(2);
        first.status = MigrationStatus::Succeeded;
        let mut second = up_record(2);
        second.status = MigrationStatus::Succeeded;
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let result = store.create_indexes(&[unique_up_index()]).await;

        assert!(matches!(result, Err(RecordStoreError::DuplicateKey { .. })));
        assert!(store.list_indexes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_creation_is_idempotent_and_detects_conflicts() {
        let store = InMemoryRecordStore::new();
        store.create_indexes(&[unique_up_index()]).await.unwrap();
        store.create_indexes(&[unique_up_index()]).await.unwrap();
        assert_eq!(store.list_indexes().await.unwrap().len(), 1);

        let conflicting = IndexSpec::new("uniq_up", vec![IndexField::Status]);
        assert_eq!(
            store.create_indexes(&[conflicting]).await,
            Err(RecordStoreError::IndexConflict {
                name: "uniq_up".to_string()
            })
        );

        store.drop_index("uniq_up").await.unwrap();
        store.drop_index("uniq_up").await.unwrap();
        assert!(store.list_indexes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_sorts_and_limits() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();
        for (version, minutes_ago) in [(1, 3), (2, 10), (3, 1)] {
            let mut record = up_record(version);
            record.applied_at = now - Duration::minutes(minutes_ago);
            store.insert(&record).await.unwrap();
        }

        let oldest = store
            .find(
                &RecordQuery::new(RecordFilter::all())
                    .sort(RecordSort::AppliedAtAscending)
                    .limit(2),
            )
            .await
            .unwrap();
        assert_eq!(
            oldest.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![2, 1]
        );

        let newest = store
            .find(&RecordQuery::new(RecordFilter::all()).sort(RecordSort::AppliedAtDescending))
            .await
            .unwrap();
        assert_eq!(newest[0].version, 3);
    }

    #[tokio::test]
    async fn test_delete_many_counts_removed_records() {
        let store = InMemoryRecordStore::new();
        let first = up_record(1);
        let second = up_record(2);
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let deleted = store
            .delete_many(&[first.id.clone(), RecordId::generate()])
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.records(), vec![second]);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let store = InMemoryRecordStore::new();
        let record = up_record(1);
        store.insert(&record).await.unwrap();

        assert_eq!(
            store.insert(&record).await,
            Err(RecordStoreError::DuplicateKey {
                index: PRIMARY_KEY_INDEX.to_string()
            })
        );
    }
}
