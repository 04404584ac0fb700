use key_algebra::{KeyType, ShardRange};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardMapKind {
    List,
    Range,
}

#[derive(Debug, Clone)]
pub struct ShardMapMeta {
    pub id: Uuid,
    pub name: String,
    pub kind: ShardMapKind,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStatus {
    Offline,
    Online,
}

/// A value snapshot of a mapping, independent of how the store crate
/// persists it (spec.md §3 "Mappings returned to callers are value
/// snapshots").
#[derive(Debug, Clone)]
pub struct MappingSnapshot {
    pub id: Uuid,
    pub shard_map_id: Uuid,
    pub shard_id: Uuid,
    pub range: ShardRange,
    pub status: MappingStatus,
    pub lock_owner_id: Uuid,
}
