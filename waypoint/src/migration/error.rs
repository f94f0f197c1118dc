use thiserror::Error;

use crate::migration::state::MigrationDirection;

/// Errors that can occur during migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// An invalid operation was attempted
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A migration declared a version that is not a positive integer
    #[error("Migration '{name}' has invalid version {version}; versions must be positive integers")]
    InvalidVersion {
        /// Name of the offending migration
        name: String,
        /// The declared version
        version: i32,
    },

    /// A migration is missing required metadata
    #[error("Migration version {version} is missing required metadata: {field}")]
    MissingMetadata {
        /// Version of the offending migration
        version: i32,
        /// Name of the missing field
        field: String,
    },

    /// Two or more migrations share a version
    #[error("Duplicate migration versions detected: {}", join_versions(.versions))]
    DuplicateVersions {
        /// Every version declared more than once, ascending
        versions: Vec<i32>,
    },

    /// A migration's `up` or `down` returned an error
    #[error("Migration {direction} {version} ({name}) failed: {message}")]
    MigrationFailed {
        /// Version of the failed migration
        version: i32,
        /// Name of the failed migration
        name: String,
        /// Direction that was being executed
        direction: MigrationDirection,
        /// Full error chain reported by the migration
        message: String,
    },

    /// The run was cancelled before the next migration started
    #[error("Migration run cancelled before version {next_version}")]
    Cancelled {
        /// Version that would have run next
        next_version: i32,
    },

    /// Record store operation failed
    #[error(transparent)]
    Store(#[from] crate::store::RecordStoreError),
}

fn join_versions(versions: &[i32]) -> String {
    versions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl MigrationError {
    /// Whether this error is a configuration defect detected while resolving migrations
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidVersion { .. } | Self::MissingMetadata { .. } | Self::DuplicateVersions { .. }
        )
    }
}

/// Result type for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;
