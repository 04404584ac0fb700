//! The operation engine (spec.md §4.C): the central state machine that
//! drives every catalog mutation through `GlobalPre -> LocalSource ->
//! LocalTarget -> GlobalPost -> UpdateCache`, with a matching undo chain on
//! failure. Concrete operations are ordinary values implementing
//! [`ShardMapOperation`] rather than a class hierarchy.

mod context;
mod engine;
pub mod error;
pub mod ops;
mod phase;
pub mod support;

pub use context::OpContext;
pub use engine::{OperationEngine, PhaseResult, ShardMapOperation};
pub use error::Error;
macros::define_result!(Error);
pub use phase::{OperationCode, Phase, UndoStartState};
