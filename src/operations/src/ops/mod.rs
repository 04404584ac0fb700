//! Concrete operations (spec.md §4.C): one struct per operation code,
//! each implementing [`crate::ShardMapOperation`].

mod mapping;
mod schema;
mod shard;
mod shard_map;
mod split_merge;
mod upgrade;

pub use mapping::{AddMappingOp, LockMappingOp, RemoveMappingOp, UnlockMappingOp, UpdateMappingOp};
pub use schema::{AddSchemaInfoOp, RemoveSchemaInfoOp, UpdateSchemaInfoOp};
pub use shard::{AddShardOp, AttachShardOp, DetachShardOp, RemoveShardOp, UpdateShardOp};
pub use shard_map::{AddShardMapOp, RemoveShardMapOp};
pub use split_merge::{MergeMappingsOp, NewMapping, ReplaceMappingsOp, SplitMappingOp};
pub use upgrade::{UpgradeStoreOp, CURRENT_SCHEMA_VERSION};
