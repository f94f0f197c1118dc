use std::sync::OnceLock;

use chrono::Duration;

/// Process-wide default configuration for migration runners
static CONFIG_INSTANCE: OnceLock<RunnerConfig> = OnceLock::new();

/// Default age after which a `Running` record is presumed abandoned
pub const DEFAULT_STALE_RUNNING_THRESHOLD_MINUTES: i64 = 5;

/// Index left behind by the earlier uniqueness scheme (succeeded-only partial unique index)
pub const LEGACY_INDEX_UNIQUE_UP_SUCCEEDED: &str = "uniq_up_succeeded_partial";

/// Tunables of a [`MigrationRunner`](crate::migration::MigrationRunner)
///
/// # Examples
///
/// ```rust
/// use chrono::Duration;
/// use waypoint::primitives::config::RunnerConfig;
///
/// let config = RunnerConfig::default()
///     .with_stale_running_threshold(Duration::minutes(15))
///     .with_legacy_index("old_version_idx");
///
/// assert_eq!(config.stale_running_threshold(), Duration::minutes(15));
/// assert_eq!(config.legacy_index_names().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    stale_running_threshold: Duration,
    legacy_index_names: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stale_running_threshold: Duration::minutes(DEFAULT_STALE_RUNNING_THRESHOLD_MINUTES),
            legacy_index_names: vec![LEGACY_INDEX_UNIQUE_UP_SUCCEEDED.to_string()],
        }
    }
}

impl RunnerConfig {
    /// Sets how old a `Running` record must be before another instance may take it over.
    ///
    /// Shorter thresholds recover faster from crashed instances but risk pre-empting
    /// a migration that is slow yet still alive.
    #[must_use]
    pub fn with_stale_running_threshold(mut self, threshold: Duration) -> Self {
        self.stale_running_threshold = threshold;
        self
    }

    /// Adds an index name that housekeeping drops when present.
    #[must_use]
    pub fn with_legacy_index(mut self, name: impl Into<String>) -> Self {
        self.legacy_index_names.push(name.into());
        self
    }

    /// Replaces the list of legacy index names.
    #[must_use]
    pub fn with_legacy_indexes(mut self, names: Vec<String>) -> Self {
        self.legacy_index_names = names;
        self
    }

    /// Age after which a `Running` record is treated as abandoned.
    #[must_use]
    pub const fn stale_running_threshold(&self) -> Duration {
        self.stale_running_threshold
    }

    /// Index names dropped by housekeeping.
    #[must_use]
    pub fn legacy_index_names(&self) -> &[String] {
        &self.legacy_index_names
    }
}

/// Initializes the process-wide default runner configuration.
///
/// Call once at startup, before constructing runners with
/// [`MigrationRunner::new`](crate::migration::MigrationRunner::new).
/// Subsequent calls are ignored with a warning.
pub fn init_runner_config(config: RunnerConfig) {
    let threshold_secs = config.stale_running_threshold.num_seconds();

    match CONFIG_INSTANCE.set(config) {
        Ok(()) => {
            crate::info!(
                "runner_config.initialized stale_running_threshold_secs={}",
                threshold_secs
            );
        }
        Err(_) => {
            crate::warn!("runner_config.already_initialized ignoring=true");
        }
    }
}

/// Gets the process-wide default runner configuration.
///
/// Returns the configuration passed to [`init_runner_config`], or
/// [`RunnerConfig::default`] when it was never initialized.
#[must_use]
pub fn runner_config() -> RunnerConfig {
    CONFIG_INSTANCE.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.stale_running_threshold(), Duration::minutes(5));
        assert_eq!(
            config.legacy_index_names(),
            &[LEGACY_INDEX_UNIQUE_UP_SUCCEEDED.to_string()]
        );
    }

    #[test]
    fn test_builder_overrides() {
        let config = RunnerConfig::default()
            .with_stale_running_threshold(Duration::seconds(30))
            .with_legacy_indexes(vec![]);
        assert_eq!(config.stale_running_threshold(), Duration::seconds(30));
        assert!(config.legacy_index_names().is_empty());
    }
}
