use std::collections::BTreeMap;
use std::sync::Arc;

use crate::migration::error::{MigrationError, MigrationResult};
use crate::migration::unit::Migration;

/// Validated metadata of a registered migration
#[derive(Clone)]
pub struct MigrationDescriptor {
    /// Version of the migration
    pub version: i32,
    /// Name recorded in the history
    pub name: String,
    /// Optional description recorded in the history
    pub description: Option<String>,
    /// The migration itself
    pub migration: Arc<dyn Migration>,
}

impl std::fmt::Debug for MigrationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDescriptor")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for MigrationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "Migration v{}: {}", self.version, description),
            None => write!(f, "Migration v{} ({})", self.version, self.name),
        }
    }
}

/// Validates registered migrations and orders them by ascending version.
///
/// # Errors
/// - `MigrationError::InvalidVersion` if a version is zero or negative
/// - `MigrationError::MissingMetadata` if a name is empty
/// - `MigrationError::DuplicateVersions` if versions repeat; lists every repeated version
pub fn resolve(migrations: Vec<Arc<dyn Migration>>) -> MigrationResult<Vec<MigrationDescriptor>> {
    crate::with_log_context!("DescriptorResolver" => {
        let mut descriptors = migrations
            .into_iter()
            .map(describe)
            .collect::<MigrationResult<Vec<_>>>()?;

        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for descriptor in &descriptors {
            *counts.entry(descriptor.version).or_default() += 1;
        }
        let duplicates: Vec<i32> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(version, _)| version)
            .collect();
        if !duplicates.is_empty() {
            crate::error!("migrations.duplicate_versions versions={:?}", duplicates);
            return Err(MigrationError::DuplicateVersions {
                versions: duplicates,
            });
        }

        descriptors.sort_by_key(|descriptor| descriptor.version);

        crate::debug!(
            "migrations.resolved count={} versions={:?}",
            descriptors.len(),
            descriptors.iter().map(|d| d.version).collect::<Vec<_>>()
        );

        Ok(descriptors)
    })
}

fn describe(migration: Arc<dyn Migration>) -> MigrationResult<MigrationDescriptor> {
    let version = migration.version();
    let name = migration.name();

    if version <= 0 {
        return Err(MigrationError::InvalidVersion { name, version });
    }
    if name.trim().is_empty() {
        return Err(MigrationError::MissingMetadata {
            version,
            field: "name".to_string(),
        });
    }

    Ok(MigrationDescriptor {
        version,
        name,
        description: migration.description(),
        migration,
    })
}
