//! Migration System
//!
//! Applies and reverts versioned, user-authored migrations against a record
//! store that several process instances may share.
//!
//! # Overview
//!
//! The migration system consists of:
//! - [`Migration`]: Trait for implementing individual migrations
//! - [`resolve`]: Validates registered migrations and orders them by version
//! - [`MigrationRunner`]: Computes the current version and drives migrations towards a target
//! - [`MigrationRecord`]: Persistent record of one execution attempt
//! - [`ensure_indexes`]: Housekeeping run before every migration run
//!
//! The execution history doubles as the lock: a partial unique index on the
//! record store admits one `Running` or `Succeeded` `Up` record per version, so
//! only one instance ever applies a given version.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use waypoint::migration::{Migration, MigrationRunner, MigrationVersion};
//! use waypoint::migration::CancellationToken;
//! use waypoint::store::InMemoryRecordStore;
//!
//! struct CreateUsers;
//!
//! #[async_trait]
//! impl Migration for CreateUsers {
//!     fn version(&self) -> i32 {
//!         1
//!     }
//!
//!     async fn up(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn down(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let runner = MigrationRunner::new(
//!     Arc::new(InMemoryRecordStore::new()),
//!     vec![Arc::new(CreateUsers) as Arc<dyn Migration>],
//! )?;
//!
//! let summary = runner
//!     .run_to(MigrationVersion::Latest, &CancellationToken::new())
//!     .await?;
//! assert_eq!(summary.applied, vec![1]);
//! # Ok::<(), waypoint::migration::MigrationError>(())
//! # }).unwrap();
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Implement [`Migration`] with a version higher than every existing one
//! 2. Keep `up` safe to re-run: an instance that crashes mid-migration leaves a
//!    `Running` record that another instance retries once it turns stale
//! 3. Register it in the list passed to [`MigrationRunner::new`]

mod descriptor;
mod error;
mod housekeeping;
mod runner;
mod state;
mod unit;
mod version;

pub use descriptor::{resolve, MigrationDescriptor};
pub use error::{MigrationError, MigrationResult};
pub use housekeeping::{
    ensure_indexes, required_indexes, HousekeepingReport, INDEX_UNIQUE_UP_RUNNING_OR_SUCCEEDED,
    INDEX_VERSION, INDEX_VERSION_DIRECTION_STATUS,
};
pub use runner::{AuditFailure, AuditOperation, MigrationRunSummary, MigrationRunner, SkipReason};
pub use state::{MigrationDirection, MigrationRecord, MigrationStatus};
pub use unit::Migration;
pub use version::MigrationVersion;

/// Cooperative cancellation, checked before each migration starts
pub use tokio_util::sync::CancellationToken;
