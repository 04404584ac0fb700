use uuid::Uuid;

use crate::{
    model::{MappingRow, PendingLogRow, ShardLocation, ShardMapRow, ShardRow},
    ResultCode,
};

/// Every read/write the operation engine and recovery manager can issue
/// against a [`crate::GlobalStore`] or [`crate::LocalStore`] transaction,
/// per spec.md §4.B. A real SQL-backed transport only has to implement one
/// dispatch function over this enum.
#[derive(Debug, Clone)]
pub enum StoreRequest {
    AddShardMap(ShardMapRow),
    RemoveShardMap { id: Uuid },
    GetShardMapByName { name: String },
    ListShardMaps,

    AddShard(ShardRow),
    UpdateShard(ShardRow),
    RemoveShard { id: Uuid },
    GetShardsByMap { shard_map_id: Uuid },
    GetShardByLocation { location: ShardLocation },
    GetShardById { id: Uuid },
    BumpShardVersion { id: Uuid, expected_version: u64 },

    AddMapping(MappingRow),
    UpdateMapping(MappingRow),
    RemoveMapping { id: Uuid },
    GetMappingsByRange { shard_map_id: Uuid, low_raw: Vec<u8>, high_raw: Option<Vec<u8>> },
    GetMappingsByShard { shard_id: Uuid },
    GetMappingById { id: Uuid },

    AddPendingOperation(PendingLogRow),
    UpdatePendingOperation(PendingLogRow),
    RemovePendingOperation { operation_id: Uuid },
    GetPendingOperations,

    AddSchemaInfo { name: String, info: String },
    RemoveSchemaInfo { name: String },
    UpdateSchemaInfo { name: String, info: String },
    GetSchemaInfo { name: String },

    GetSchemaVersion,
    SetSchemaVersion { version: u32 },
}

/// One row of any shape a [`StoreRequest`] can return.
#[derive(Debug, Clone)]
pub enum StoreRow {
    ShardMap(ShardMapRow),
    Shard(ShardRow),
    Mapping(MappingRow),
    PendingOperation(PendingLogRow),
    SchemaInfo { name: String, info: String },
    SchemaVersion(u32),
}

/// A typed result, not a bare value, per spec.md §4.B: "The store raises
/// typed results... carrying: success flag, result code, and rows".
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub success: bool,
    pub code: ResultCode,
    pub rows: Vec<StoreRow>,
}

impl StoreResult {
    pub fn ok(rows: Vec<StoreRow>) -> Self {
        StoreResult {
            success: true,
            code: ResultCode::Success,
            rows,
        }
    }

    pub fn failed(code: ResultCode) -> Self {
        StoreResult {
            success: false,
            code,
            rows: Vec::new(),
        }
    }
}
