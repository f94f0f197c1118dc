/// Target of a migration run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationVersion {
    /// The highest version among the registered migrations
    Latest,
    /// A specific version; `0` reverts every applied migration
    Exact(i32),
}

impl MigrationVersion {
    /// Resolves the target against the highest registered version.
    ///
    /// Returns the resolved version and whether an explicit request had to be
    /// clamped down to `highest_known`.
    #[must_use]
    pub const fn resolve(self, highest_known: i32) -> (i32, bool) {
        match self {
            Self::Latest => (highest_known, false),
            Self::Exact(version) if version > highest_known => (highest_known, true),
            Self::Exact(version) => (version, false),
        }
    }
}

impl From<i32> for MigrationVersion {
    fn from(version: i32) -> Self {
        Self::Exact(version)
    }
}

impl std::fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_resolves_to_highest_known() {
        assert_eq!(MigrationVersion::Latest.resolve(7), (7, false));
        assert_eq!(MigrationVersion::Latest.resolve(0), (0, false));
    }

    #[test]
    fn test_exact_above_highest_is_clamped() {
        assert_eq!(MigrationVersion::Exact(12).resolve(7), (7, true));
        assert_eq!(MigrationVersion::from(7).resolve(7), (7, false));
        assert_eq!(MigrationVersion::from(2).resolve(7), (2, false));
    }

    #[test]
    fn test_display() {
        assert_eq!(MigrationVersion::Latest.to_string(), "latest");
        assert_eq!(MigrationVersion::Exact(4).to_string(), "4");
    }
}
