//! The shard map manager (spec.md §4.E/§4.H): the library surface
//! applications depend on, combining the operation engine, the mapping
//! cache, and crash recovery behind one facade. Programmatic, no CLI
//! (spec.md §6).
//!
//! Non-goals carried over from spec.md §1: no relational query language, no
//! end-to-end request execution, no authentication, no wire encoding. The
//! SQL-specific transport and connection-issuance helpers spec.md §6 names
//! as external collaborators are represented only by the `store` crate's
//! trait boundary in this workspace, never implemented against a real
//! database.

mod config;
pub mod error;
mod manager;
mod shard_map;

pub use cache::{MappingSnapshot, MappingStatus, ShardMapMeta};
pub use config::{ShardMapManagerConfig, ShardMapManagerConfigBuilder};
pub use error::Error;
macros::define_result!(Error);
pub use manager::{OpenOptions, ShardMapManager};
pub use shard_map::{ListShardMap, RangeShardMap, ShardMap, ShardMapRef};
