use std::collections::HashMap;

use async_trait::async_trait;
use key_algebra::KeyType;
use serde::{Deserialize, Serialize};
use store::{GlobalStore, LocalStore, LocalStoreFactory, MappingRow, MappingStatus, ShardRangeRow, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::{context::OpContext, engine::PhaseResult, error, phase::OperationCode, support, ShardMapOperation};

/// Splits one mapping into two at `at_raw`, both remaining on the same
/// shard: a metadata-only repartition, not a data migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitMappingOp {
    pub operation_id: Uuid,
    pub mapping_id: Uuid,
    pub shard_map_id: Uuid,
    pub shard_id: Uuid,
    pub key_type: KeyType,
    pub at_raw: Vec<u8>,
    pub left_id: Uuid,
    pub right_id: Uuid,
    /// The row `global_pre` split, captured so undo can put the whole
    /// mapping back instead of re-deriving it from the two halves.
    #[serde(skip)]
    pub original: Option<MappingRow>,
}

impl SplitMappingOp {
    pub fn new(shard_map_id: Uuid, shard_id: Uuid, mapping_id: Uuid, key_type: KeyType, at_raw: Vec<u8>) -> Self {
        SplitMappingOp {
            operation_id: Uuid::new_v4(),
            mapping_id,
            shard_map_id,
            shard_id,
            key_type,
            at_raw,
            left_id: Uuid::new_v4(),
            right_id: Uuid::new_v4(),
            original: None,
        }
    }
}

#[async_trait]
impl ShardMapOperation for SplitMappingOp {
    fn code(&self) -> OperationCode {
        OperationCode::SplitMapping
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: self.mapping_id }).await?;
        let existing = support::ensure_success(existing, format!("mapping {} does not exist", self.mapping_id))?;
        let original = match existing.rows.into_iter().next() {
            Some(StoreRow::Mapping(row)) => row,
            _ => unreachable!("GetMappingById on success always returns one Mapping row"),
        };
        self.original = Some(original.clone());

        let version = support::bump_shard_version(&mut *txn, self.shard_id).await?;
        let mut shard_versions = HashMap::new();
        shard_versions.insert(self.shard_id, version.version);

        txn.execute(StoreRequest::RemoveMapping { id: self.mapping_id }).await?;
        let left = MappingRow {
            id: self.left_id,
            shard_map_id: self.shard_map_id,
            shard_id: self.shard_id,
            range: ShardRangeRow {
                low_raw: original.range.low_raw.clone(),
                high_raw: Some(self.at_raw.clone()),
            },
            status: original.status,
            lock_owner_id: original.lock_owner_id,
        };
        let right = MappingRow {
            id: self.right_id,
            shard_map_id: self.shard_map_id,
            shard_id: self.shard_id,
            range: ShardRangeRow {
                low_raw: self.at_raw.clone(),
                high_raw: original.range.high_raw.clone(),
            },
            status: original.status,
            lock_owner_id: original.lock_owner_id,
        };
        let result = txn.execute(StoreRequest::AddMapping(left)).await?;
        support::ensure_success(result, "split: left half rejected".to_string())?;
        let result = txn.execute(StoreRequest::AddMapping(right)).await?;
        support::ensure_success(result, "split: right half rejected".to_string())?;

        let log_row = support::pending_log_row(self.operation_id, self.code(), self, shard_versions)?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let location = support::shard_location(ctx, self.shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.mapping_id }).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(original) = self.original.clone() else { return Ok(()) };
        let location = support::shard_location(ctx, self.shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.left_id }).await.ok();
        txn.execute(StoreRequest::RemoveMapping { id: self.right_id }).await.ok();
        txn.execute(StoreRequest::AddMapping(original)).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(original) = self.original.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.left_id }).await.ok();
        txn.execute(StoreRequest::RemoveMapping { id: self.right_id }).await.ok();
        txn.execute(StoreRequest::AddMapping(original)).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        support::undo_shard_version_bump(ctx, self.shard_id).await;
        Ok(())
    }
}

/// Merges two adjacent mappings on the same shard into one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeMappingsOp {
    pub operation_id: Uuid,
    pub left_id: Uuid,
    pub right_id: Uuid,
    pub shard_map_id: Uuid,
    pub shard_id: Uuid,
    pub merged_id: Uuid,
    /// The two rows `global_pre` consumed, captured so undo can restore
    /// both instead of re-splitting the merged row.
    #[serde(skip)]
    pub original_left: Option<MappingRow>,
    #[serde(skip)]
    pub original_right: Option<MappingRow>,
}

impl MergeMappingsOp {
    pub fn new(shard_map_id: Uuid, shard_id: Uuid, left_id: Uuid, right_id: Uuid) -> Self {
        MergeMappingsOp {
            operation_id: Uuid::new_v4(),
            left_id,
            right_id,
            shard_map_id,
            shard_id,
            merged_id: Uuid::new_v4(),
            original_left: None,
            original_right: None,
        }
    }
}

#[async_trait]
impl ShardMapOperation for MergeMappingsOp {
    fn code(&self) -> OperationCode {
        OperationCode::MergeMappings
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let left = txn.execute(StoreRequest::GetMappingById { id: self.left_id }).await?;
        let left = support::ensure_success(left, format!("mapping {} does not exist", self.left_id))?;
        let right = txn.execute(StoreRequest::GetMappingById { id: self.right_id }).await?;
        let right = support::ensure_success(right, format!("mapping {} does not exist", self.right_id))?;
        let (left, right) = match (left.rows.into_iter().next(), right.rows.into_iter().next()) {
            (Some(StoreRow::Mapping(l)), Some(StoreRow::Mapping(r))) => (l, r),
            _ => unreachable!("GetMappingById on success always returns one Mapping row"),
        };
        self.original_left = Some(left.clone());
        self.original_right = Some(right.clone());
        if left.range.high_raw.as_deref() != Some(&right.range.low_raw) {
            return support::ensure_success(
                store::StoreResult::failed(store::ResultCode::MappingRangesNotAdjacent),
                format!("mappings {} and {} are not adjacent", self.left_id, self.right_id),
            )
            .map(|_| ());
        }
        if left.shard_id != right.shard_id {
            return error::RejectedSnafu {
                code: store::ResultCode::InvalidArgument,
                what: format!("mappings {} and {} are on different shards", self.left_id, self.right_id),
            }
            .fail();
        }
        if left.status != right.status {
            return error::RejectedSnafu {
                code: store::ResultCode::InvalidArgument,
                what: format!("mappings {} and {} have different status", self.left_id, self.right_id),
            }
            .fail();
        }
        if left.lock_owner_id != right.lock_owner_id {
            return error::RejectedSnafu {
                code: store::ResultCode::MappingLockMismatch,
                what: format!("mappings {} and {} have different lock owners", self.left_id, self.right_id),
            }
            .fail();
        }

        let version = support::bump_shard_version(&mut *txn, left.shard_id).await?;
        let mut shard_versions = HashMap::new();
        shard_versions.insert(left.shard_id, version.version);

        txn.execute(StoreRequest::RemoveMapping { id: self.left_id }).await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.right_id }).await?;
        let merged = MappingRow {
            id: self.merged_id,
            shard_map_id: self.shard_map_id,
            shard_id: self.shard_id,
            range: ShardRangeRow {
                low_raw: left.range.low_raw,
                high_raw: right.range.high_raw,
            },
            status: left.status,
            lock_owner_id: left.lock_owner_id,
        };
        let result = txn.execute(StoreRequest::AddMapping(merged)).await?;
        support::ensure_success(result, "merge rejected".to_string())?;

        let log_row = support::pending_log_row(self.operation_id, self.code(), self, shard_versions)?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let location = support::shard_location(ctx, self.shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.left_id }).await.ok();
        txn.execute(StoreRequest::RemoveMapping { id: self.right_id }).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let (Some(left), Some(right)) = (self.original_left.clone(), self.original_right.clone()) else {
            return Ok(());
        };
        let location = support::shard_location(ctx, self.shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.merged_id }).await.ok();
        txn.execute(StoreRequest::AddMapping(left)).await.ok();
        txn.execute(StoreRequest::AddMapping(right)).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let (Some(left), Some(right)) = (self.original_left.clone(), self.original_right.clone()) else {
            return Ok(());
        };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.merged_id }).await.ok();
        txn.execute(StoreRequest::AddMapping(left)).await.ok();
        txn.execute(StoreRequest::AddMapping(right)).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        support::undo_shard_version_bump(ctx, self.shard_id).await;
        Ok(())
    }
}

/// One row in a [`ReplaceMappingsOp`]'s additions, serializable so the
/// whole op can live in a pending-log `intent` string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMapping {
    pub shard_id: Uuid,
    pub low_raw: Vec<u8>,
    pub high_raw: Option<Vec<u8>>,
    pub status: MappingStatus,
}

/// Atomically removes a set of mappings and adds a replacement set, used by
/// recovery's repair step (spec.md §4.F "the local catalog is replaced with
/// the global view for the affected ranges", and vice versa).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceMappingsOp {
    pub operation_id: Uuid,
    pub shard_map_id: Uuid,
    pub remove_ids: Vec<Uuid>,
    pub add: Vec<NewMapping>,
    #[serde(skip)]
    pub added_ids: Vec<Uuid>,
}

impl ReplaceMappingsOp {
    pub fn new(shard_map_id: Uuid, remove_ids: Vec<Uuid>, add: Vec<NewMapping>) -> Self {
        ReplaceMappingsOp {
            operation_id: Uuid::new_v4(),
            shard_map_id,
            remove_ids,
            add,
            added_ids: Vec::new(),
        }
    }
}

#[async_trait]
impl ShardMapOperation for ReplaceMappingsOp {
    fn code(&self) -> OperationCode {
        OperationCode::ReplaceMappings
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        for id in &self.remove_ids {
            txn.execute(StoreRequest::RemoveMapping { id: *id }).await?;
        }
        self.added_ids.clear();
        for new_mapping in &self.add {
            let id = Uuid::new_v4();
            let row = MappingRow {
                id,
                shard_map_id: self.shard_map_id,
                shard_id: new_mapping.shard_id,
                range: ShardRangeRow {
                    low_raw: new_mapping.low_raw.clone(),
                    high_raw: new_mapping.high_raw.clone(),
                },
                status: new_mapping.status,
                lock_owner_id: Uuid::nil(),
            };
            let result = txn.execute(StoreRequest::AddMapping(row)).await?;
            support::ensure_success(result, "replace: new mapping rejected".to_string())?;
            self.added_ids.push(id);
        }
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }
}
