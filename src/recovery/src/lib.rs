//! Crash recovery and local/global reconciliation (spec.md §4.F): replaying
//! pending-log undo chains left behind by a process that died mid-operation,
//! and detecting/resolving disagreements between a shard's local catalog and
//! the global catalog's view of it.

mod diff;
pub mod error;
mod manager;
mod model;
mod pending;

pub use error::Error;
macros::define_result!(Error);
pub use manager::RecoveryManager;
pub use model::{DiffRange, DiffState, DiffToken, MappingDifferenceResolution};
