#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use waypoint::migration::{Migration, MigrationRecord};
use waypoint::primitives::RecordId;
use waypoint::store::{
    IndexSpec, InMemoryRecordStore, MigrationRecordStore, RecordQuery, RecordStoreError,
    RecordUpdate,
};

/// Shared, ordered log of `up:N` / `down:N` calls
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

/// Migration that records every call in a [`CallLog`]
pub struct RecordingMigration {
    pub version: i32,
    pub log: CallLog,
    pub fail_up: bool,
    pub fail_down: bool,
    pub delay: Option<Duration>,
}

impl RecordingMigration {
    pub fn new(version: i32, log: &CallLog) -> Self {
        Self {
            version,
            log: log.clone(),
            fail_up: false,
            fail_down: false,
            delay: None,
        }
    }

    pub fn failing_up(mut self) -> Self {
        self.fail_up = true;
        self
    }

    pub fn failing_down(mut self) -> Self {
        self.fail_down = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Migration for RecordingMigration {
    fn version(&self) -> i32 {
        self.version
    }

    fn name(&self) -> String {
        format!("Recording{}", self.version)
    }

    fn description(&self) -> Option<String> {
        Some(format!("recording migration {}", self.version))
    }

    async fn up(&self) -> anyhow::Result<()> {
        self.log.push(format!("up:{}", self.version));
        self.pause().await;
        if self.fail_up {
            anyhow::bail!("up {} exploded", self.version);
        }
        Ok(())
    }

    async fn down(&self) -> anyhow::Result<()> {
        self.log.push(format!("down:{}", self.version));
        self.pause().await;
        if self.fail_down {
            anyhow::bail!("down {} exploded", self.version);
        }
        Ok(())
    }
}

/// Builds the migration list for `versions`, all logging to `log`
pub fn recording_set(versions: &[i32], log: &CallLog) -> Vec<Arc<dyn Migration>> {
    versions
        .iter()
        .map(|version| Arc::new(RecordingMigration::new(*version, log)) as Arc<dyn Migration>)
        .collect()
}

/// Store wrapper whose writes can be switched to fail
#[derive(Default)]
pub struct FlakyRecordStore {
    pub inner: InMemoryRecordStore,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
}

impl FlakyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

fn unavailable() -> RecordStoreError {
    RecordStoreError::Unavailable("primary stepped down".to_string())
}

#[async_trait]
impl MigrationRecordStore for FlakyRecordStore {
    async fn insert(&self, record: &MigrationRecord) -> Result<(), RecordStoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.insert(record).await
    }

    async fn find(&self, query: &RecordQuery) -> Result<Vec<MigrationRecord>, RecordStoreError> {
        self.inner.find(query).await
    }

    async fn update_one(&self, id: &RecordId, update: &RecordUpdate) -> Result<(), RecordStoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.update_one(id, update).await
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<u64, RecordStoreError> {
        self.inner.delete_many(ids).await
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, RecordStoreError> {
        self.inner.list_indexes().await
    }

    async fn create_indexes(&self, specs: &[IndexSpec]) -> Result<(), RecordStoreError> {
        self.inner.create_indexes(specs).await
    }

    async fn drop_index(&self, name: &str) -> Result<(), RecordStoreError> {
        self.inner.drop_index(name).await
    }
}
