#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

//! `waypoint` is a versioned migration engine for stores shared by many
//! process instances.
//!
//! Migrations are applied and reverted in version order, and the persisted
//! execution history doubles as the coordination mechanism: a uniqueness
//! constraint on the history lets exactly one instance apply each version,
//! and abandoned attempts are recovered once they turn stale.

/// Versioned migrations, their validation and the runner that executes them.
pub mod migration;

/// Introduces low level primitives: identifiers, configuration and logging.
pub mod primitives;

/// Persistence interface for migration records and an in-memory implementation.
pub mod store;

/// Error helpers shared across the crate.
pub mod waypoint_error;

#[doc(hidden)]
pub use log as __log;
