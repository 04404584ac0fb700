use std::collections::HashMap;

use bitflags::bitflags;
use key_algebra::KeyType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server + database name, compared case-insensitively (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardLocation {
    pub server: String,
    pub database: String,
}

impl ShardLocation {
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
        ShardLocation {
            server: server.into(),
            database: database.into(),
        }
    }

    fn normalized(&self) -> (String, String) {
        (self.server.to_ascii_lowercase(), self.database.to_ascii_lowercase())
    }
}

impl PartialEq for ShardLocation {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}
impl Eq for ShardLocation {}

impl std::hash::Hash for ShardLocation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

bitflags! {
    /// Shard status is a bit-set; only `ONLINE` permits mapping writes
    /// referencing the shard (spec.md §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ShardStatus: u32 {
        const OFFLINE = 0b0000_0000;
        const ONLINE  = 0b0000_0001;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRow {
    pub id: Uuid,
    pub version: u64,
    pub shard_map_id: Uuid,
    pub location: ShardLocation,
    pub status: ShardStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardMapKind {
    List,
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMapRow {
    pub id: Uuid,
    pub name: String,
    pub kind: ShardMapKind,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingStatus {
    Offline,
    Online,
}

/// A serialized [`key_algebra::ShardRange`]: `high_raw == None` means the
/// high bound is the key type's max sentinel (unbounded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRangeRow {
    pub low_raw: Vec<u8>,
    pub high_raw: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRow {
    pub id: Uuid,
    pub shard_map_id: Uuid,
    pub shard_id: Uuid,
    pub range: ShardRangeRow,
    pub status: MappingStatus,
    /// Nil (`Uuid::nil()`) is the well-known "no lock" sentinel.
    pub lock_owner_id: Uuid,
}

/// A pending-operation log entry (spec.md §3, §4.C, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLogRow {
    pub operation_id: Uuid,
    pub operation_code: String,
    pub undo_start_state: String,
    /// A structured serialization (JSON) of the operation's inputs,
    /// sufficient for recovery to reconstruct the operation object.
    pub intent: String,
    pub original_shard_versions: HashMap<Uuid, u64>,
}
