use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    error,
    model::{MappingRow, PendingLogRow, ShardMapRow, ShardRow},
    request::{StoreRequest, StoreResult, StoreRow},
    ResultCode, Result,
};

/// The in-memory shape of one catalog (global, or one shard's local mirror).
/// Shared by [`super::MemGlobalStore`] and [`super::MemLocalStore`]: a local
/// catalog simply never receives the shard-map/shard/pending-log request
/// variants in practice, since only the global catalog owns those rows.
#[derive(Debug, Clone, Default)]
pub(crate) struct CatalogData {
    pub shard_maps: HashMap<Uuid, ShardMapRow>,
    pub shards: HashMap<Uuid, ShardRow>,
    pub mappings: HashMap<Uuid, MappingRow>,
    pub pending_ops: HashMap<Uuid, PendingLogRow>,
    pub schema_infos: HashMap<String, String>,
    pub schema_version: u32,
}

impl CatalogData {
    fn shard_map_by_name(&self, name: &str) -> Option<&ShardMapRow> {
        self.shard_maps
            .values()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    fn shard_by_location(&self, location: &crate::ShardLocation) -> Option<&ShardRow> {
        self.shards.values().find(|s| &s.location == location)
    }

    fn mapping_intersects(&self, shard_map_id: Uuid, low: &[u8], high: Option<&[u8]>, exclude: Option<Uuid>) -> bool {
        self.mappings.values().any(|m| {
            if m.shard_map_id != shard_map_id {
                return false;
            }
            if exclude == Some(m.id) {
                return false;
            }
            ranges_intersect(
                &m.range.low_raw,
                m.range.high_raw.as_deref(),
                low,
                high,
            )
        })
    }

    pub(crate) fn apply(&mut self, request: StoreRequest) -> Result<StoreResult> {
        match request {
            StoreRequest::AddShardMap(row) => {
                if self.shard_map_by_name(&row.name).is_some() {
                    return Ok(StoreResult::failed(ResultCode::ShardMapExists));
                }
                self.shard_maps.insert(row.id, row);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::RemoveShardMap { id } => {
                if self.shard_maps.remove(&id).is_none() {
                    return Ok(StoreResult::failed(ResultCode::ShardMapDoesNotExist));
                }
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::GetShardMapByName { name } => match self.shard_map_by_name(&name) {
                Some(row) => Ok(StoreResult::ok(vec![StoreRow::ShardMap(row.clone())])),
                None => Ok(StoreResult::failed(ResultCode::ShardMapDoesNotExist)),
            },
            StoreRequest::ListShardMaps => Ok(StoreResult::ok(
                self.shard_maps.values().cloned().map(StoreRow::ShardMap).collect(),
            )),

            StoreRequest::AddShard(row) => {
                if self.shard_by_location(&row.location).is_some() {
                    return Ok(StoreResult::failed(ResultCode::ShardExists));
                }
                self.shards.insert(row.id, row);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::UpdateShard(row) => {
                if !self.shards.contains_key(&row.id) {
                    return Ok(StoreResult::failed(ResultCode::ShardDoesNotExist));
                }
                self.shards.insert(row.id, row);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::RemoveShard { id } => {
                if self.shards.remove(&id).is_none() {
                    return Ok(StoreResult::failed(ResultCode::ShardDoesNotExist));
                }
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::GetShardsByMap { shard_map_id } => Ok(StoreResult::ok(
                self.shards
                    .values()
                    .filter(|s| s.shard_map_id == shard_map_id)
                    .cloned()
                    .map(StoreRow::Shard)
                    .collect(),
            )),
            StoreRequest::GetShardByLocation { location } => match self.shard_by_location(&location) {
                Some(row) => Ok(StoreResult::ok(vec![StoreRow::Shard(row.clone())])),
                None => Ok(StoreResult::failed(ResultCode::ShardDoesNotExist)),
            },
            StoreRequest::GetShardById { id } => match self.shards.get(&id) {
                Some(row) => Ok(StoreResult::ok(vec![StoreRow::Shard(row.clone())])),
                None => Ok(StoreResult::failed(ResultCode::ShardDoesNotExist)),
            },
            StoreRequest::BumpShardVersion { id, expected_version } => {
                let shard = self
                    .shards
                    .get_mut(&id)
                    .ok_or_else(|| error::NotFoundSnafu { what: format!("shard {id}") }.build())?;
                if shard.version != expected_version {
                    return Ok(StoreResult::failed(ResultCode::StaleVersion));
                }
                shard.version += 1;
                Ok(StoreResult::ok(vec![StoreRow::Shard(shard.clone())]))
            }

            StoreRequest::AddMapping(row) => {
                if self.mapping_intersects(row.shard_map_id, &row.range.low_raw, row.range.high_raw.as_deref(), None) {
                    return Ok(StoreResult::failed(ResultCode::MappingRangeAlreadyMapped));
                }
                self.mappings.insert(row.id, row);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::UpdateMapping(row) => {
                if !self.mappings.contains_key(&row.id) {
                    return Ok(StoreResult::failed(ResultCode::MappingDoesNotExist));
                }
                if self.mapping_intersects(
                    row.shard_map_id,
                    &row.range.low_raw,
                    row.range.high_raw.as_deref(),
                    Some(row.id),
                ) {
                    return Ok(StoreResult::failed(ResultCode::MappingRangeAlreadyMapped));
                }
                self.mappings.insert(row.id, row);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::RemoveMapping { id } => {
                if self.mappings.remove(&id).is_none() {
                    return Ok(StoreResult::failed(ResultCode::MappingDoesNotExist));
                }
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::GetMappingsByRange { shard_map_id, low_raw, high_raw } => Ok(StoreResult::ok(
                self.mappings
                    .values()
                    .filter(|m| {
                        m.shard_map_id == shard_map_id
                            && ranges_intersect(&m.range.low_raw, m.range.high_raw.as_deref(), &low_raw, high_raw.as_deref())
                    })
                    .cloned()
                    .map(StoreRow::Mapping)
                    .collect(),
            )),
            StoreRequest::GetMappingsByShard { shard_id } => Ok(StoreResult::ok(
                self.mappings
                    .values()
                    .filter(|m| m.shard_id == shard_id)
                    .cloned()
                    .map(StoreRow::Mapping)
                    .collect(),
            )),
            StoreRequest::GetMappingById { id } => match self.mappings.get(&id) {
                Some(row) => Ok(StoreResult::ok(vec![StoreRow::Mapping(row.clone())])),
                None => Ok(StoreResult::failed(ResultCode::MappingDoesNotExist)),
            },

            StoreRequest::AddPendingOperation(row) => {
                self.pending_ops.insert(row.operation_id, row);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::UpdatePendingOperation(row) => {
                if !self.pending_ops.contains_key(&row.operation_id) {
                    return Ok(StoreResult::failed(ResultCode::InvalidArgument));
                }
                self.pending_ops.insert(row.operation_id, row);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::RemovePendingOperation { operation_id } => {
                self.pending_ops.remove(&operation_id);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::GetPendingOperations => Ok(StoreResult::ok(
                self.pending_ops
                    .values()
                    .cloned()
                    .map(StoreRow::PendingOperation)
                    .collect(),
            )),

            StoreRequest::AddSchemaInfo { name, info } => {
                if self.schema_infos.contains_key(&name) {
                    return Ok(StoreResult::failed(ResultCode::ShardMapExists));
                }
                self.schema_infos.insert(name, info);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::RemoveSchemaInfo { name } => {
                if self.schema_infos.remove(&name).is_none() {
                    return Ok(StoreResult::failed(ResultCode::ShardMapDoesNotExist));
                }
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::UpdateSchemaInfo { name, info } => {
                if !self.schema_infos.contains_key(&name) {
                    return Ok(StoreResult::failed(ResultCode::ShardMapDoesNotExist));
                }
                self.schema_infos.insert(name, info);
                Ok(StoreResult::ok(vec![]))
            }
            StoreRequest::GetSchemaInfo { name } => match self.schema_infos.get(&name) {
                Some(info) => Ok(StoreResult::ok(vec![StoreRow::SchemaInfo {
                    name,
                    info: info.clone(),
                }])),
                None => Ok(StoreResult::failed(ResultCode::ShardMapDoesNotExist)),
            },

            StoreRequest::GetSchemaVersion => {
                Ok(StoreResult::ok(vec![StoreRow::SchemaVersion(self.schema_version)]))
            }
            StoreRequest::SetSchemaVersion { version } => {
                self.schema_version = version;
                Ok(StoreResult::ok(vec![]))
            }
        }
    }
}

/// Half-open range intersection directly on raw bytes: `None` for a high
/// bound means the max sentinel (unbounded).
fn ranges_intersect(a_low: &[u8], a_high: Option<&[u8]>, b_low: &[u8], b_high: Option<&[u8]>) -> bool {
    let a_low_lt_b_high = match b_high {
        Some(h) => a_low < h,
        None => true,
    };
    let b_low_lt_a_high = match a_high {
        Some(h) => b_low < h,
        None => true,
    };
    a_low_lt_b_high && b_low_lt_a_high
}
