use async_trait::async_trait;

/// Trait that all migrations must implement
///
/// A migration is a versioned change to a persistent store. The runner calls
/// [`up`](Self::up) to apply it and [`down`](Self::down) to revert it, and
/// treats each call as one indivisible step: it is never interrupted once
/// started.
///
/// Migrations should be written so that re-running `up` after a crash is
/// harmless: an instance that dies mid-migration leaves a `Running` record
/// that another instance takes over once it becomes stale.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use waypoint::migration::Migration;
///
/// struct AddUserEmailIndex;
///
/// #[async_trait]
/// impl Migration for AddUserEmailIndex {
///     fn version(&self) -> i32 {
///         3
///     }
///
///     fn description(&self) -> Option<String> {
///         Some("index users by email".to_string())
///     }
///
///     async fn up(&self) -> anyhow::Result<()> {
///         // create the index
///         Ok(())
///     }
///
///     async fn down(&self) -> anyhow::Result<()> {
///         // drop the index
///         Ok(())
///     }
/// }
///
/// assert_eq!(AddUserEmailIndex.name(), "AddUserEmailIndex");
/// ```
#[async_trait]
pub trait Migration: Send + Sync {
    /// Version of this migration; a positive integer unique among registered migrations
    fn version(&self) -> i32;

    /// Stable name recorded in the history, defaults to the implementing type's name
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>()).to_string()
    }

    /// Optional human-readable description recorded in the history
    fn description(&self) -> Option<String> {
        None
    }

    /// Apply the migration
    async fn up(&self) -> anyhow::Result<()>;

    /// Revert the migration
    async fn down(&self) -> anyhow::Result<()>;

    /// Whether [`up`](Self::up) should run. Returning `false` skips the migration
    /// silently, without writing a record.
    fn should_up(&self) -> bool {
        true
    }

    /// Whether [`down`](Self::down) should run. Returning `false` skips the revert
    /// silently, without writing a record.
    fn should_down(&self) -> bool {
        true
    }
}

/// Strips the module path and generic arguments from a type name
fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}
