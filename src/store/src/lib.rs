//! The catalog store abstraction (spec.md §4.B): a transactional boundary
//! between the operation engine and the global/local catalogs, plus the
//! in-memory reference backend used by tests and by callers that do not
//! wire a real database.
//!
//! The SQL-specific transport named as an external collaborator in spec.md
//! §6 is out of scope here; it would be another implementation of
//! [`GlobalStore`]/[`LocalStore`] dispatching [`StoreRequest`] the same way
//! [`mem::MemGlobalStore`] does.

pub mod error;
pub mod mem;
mod model;
mod request;
mod result_code;
mod transaction;

use async_trait::async_trait;

pub use error::Error;
macros::define_result!(Error);
pub use model::{
    MappingRow, MappingStatus, PendingLogRow, ShardLocation, ShardMapKind, ShardMapRow, ShardRangeRow,
    ShardRow, ShardStatus,
};
pub use request::{StoreRequest, StoreResult, StoreRow};
pub use result_code::{ErrorCategory, ResultCode};
pub use transaction::StoreTransaction;

/// The single logical catalog shared by all clients.
#[async_trait]
pub trait GlobalStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A per-shard mirror of the mappings referencing that shard.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    fn location(&self) -> &ShardLocation;
}

/// Resolves a [`ShardLocation`] to the [`LocalStore`] backing it. The
/// operation engine and recovery manager hold one of these rather than a
/// fixed set of connections, since the set of shards changes at runtime.
#[async_trait]
pub trait LocalStoreFactory: Send + Sync + 'static {
    async fn local_store(&self, location: &ShardLocation) -> Result<std::sync::Arc<dyn LocalStore>>;
}
