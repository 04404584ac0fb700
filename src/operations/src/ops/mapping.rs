use std::collections::HashMap;

use async_trait::async_trait;
use key_algebra::KeyType;
use serde::{Deserialize, Serialize};
use store::{GlobalStore, LocalStore, LocalStoreFactory, MappingRow, MappingStatus, ShardStatus, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::{context::OpContext, engine::PhaseResult, error, phase::OperationCode, support, Result, ShardMapOperation};

fn check_lock(row: &MappingRow, caller_lock_owner_id: Uuid) -> Result<()> {
    if row.lock_owner_id != Uuid::nil() && row.lock_owner_id != caller_lock_owner_id {
        return error::RejectedSnafu {
            code: store::ResultCode::MappingLockMismatch,
            what: format!("mapping {} is locked by {}", row.id, row.lock_owner_id),
        }
        .fail();
    }
    Ok(())
}

/// Covers both `AddRangeMapping` and `AddPointMapping` (spec.md §4.C): a
/// point mapping is simply the normalized single-point range `[key,
/// next(key))`, constructed by the caller before this op sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMappingOp {
    pub operation_id: Uuid,
    pub mapping_id: Uuid,
    pub shard_map_id: Uuid,
    pub shard_id: Uuid,
    pub key_type: KeyType,
    pub low_raw: Vec<u8>,
    pub high_raw: Option<Vec<u8>>,
    pub is_point: bool,
}

impl AddMappingOp {
    pub fn new(
        shard_map_id: Uuid,
        shard_id: Uuid,
        key_type: KeyType,
        low_raw: Vec<u8>,
        high_raw: Option<Vec<u8>>,
        is_point: bool,
    ) -> Self {
        AddMappingOp {
            operation_id: Uuid::new_v4(),
            mapping_id: Uuid::new_v4(),
            shard_map_id,
            shard_id,
            key_type,
            low_raw,
            high_raw,
            is_point,
        }
    }

    fn row(&self) -> MappingRow {
        MappingRow {
            id: self.mapping_id,
            shard_map_id: self.shard_map_id,
            shard_id: self.shard_id,
            range: store::ShardRangeRow {
                low_raw: self.low_raw.clone(),
                high_raw: self.high_raw.clone(),
            },
            status: MappingStatus::Online,
            lock_owner_id: Uuid::nil(),
        }
    }
}

#[async_trait]
impl ShardMapOperation for AddMappingOp {
    fn code(&self) -> OperationCode {
        if self.is_point {
            OperationCode::AddPointMapping
        } else {
            OperationCode::AddRangeMapping
        }
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let shard = txn.execute(StoreRequest::GetShardById { id: self.shard_id }).await?;
        let shard = support::ensure_success(shard, format!("shard {} does not exist", self.shard_id))?;
        let shard_row = match shard.rows.into_iter().next() {
            Some(StoreRow::Shard(row)) => row,
            _ => unreachable!("GetShardById on success always returns one Shard row"),
        };
        if !shard_row.status.contains(ShardStatus::ONLINE) {
            return error::RejectedSnafu {
                code: store::ResultCode::ShardIsOffline,
                what: format!("shard {} is offline", self.shard_id),
            }
            .fail();
        }
        let original = support::bump_shard_version(&mut *txn, self.shard_id).await?;
        let result = txn.execute(StoreRequest::AddMapping(self.row())).await?;
        support::ensure_success(result, "mapping range already mapped".to_string())?;
        let mut shard_versions = HashMap::new();
        shard_versions.insert(self.shard_id, original.version);
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, shard_versions)?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let location = support::shard_location(ctx, self.shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::AddMapping(self.row())).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn update_cache(&mut self, ctx: &OpContext) -> PhaseResult {
        let snapshot = support::row_to_snapshot(&self.row(), self.key_type)?;
        ctx.cache
            .add_or_update(self.shard_map_id, snapshot, cache::TtlPolicy::ResetTtl)?;
        Ok(())
    }

    async fn undo_local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let location = support::shard_location(ctx, self.shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.mapping_id }).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.mapping_id }).await?;
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        support::undo_shard_version_bump(ctx, self.shard_id).await;
        Ok(())
    }
}

/// Covers `UpdateRangeMapping`/`UpdatePointMapping`: may change shard,
/// status, or lock (spec.md §4.C). When `new_shard_id != old_shard_id` the
/// mapping migrates local catalogs: `local_source` clears it from the old
/// shard, `local_target` writes it to the new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMappingOp {
    pub operation_id: Uuid,
    pub mapping_id: Uuid,
    pub shard_map_id: Uuid,
    pub old_shard_id: Uuid,
    pub new_shard_id: Uuid,
    pub key_type: KeyType,
    pub low_raw: Vec<u8>,
    pub high_raw: Option<Vec<u8>>,
    pub status: MappingStatus,
    pub lock_owner_id: Uuid,
    pub caller_lock_owner_id: Uuid,
    pub is_point: bool,
    /// The row `global_pre` overwrote, captured so undo can restore it both
    /// globally and on whichever shard(s) the local phases touched.
    #[serde(skip)]
    pub previous_row: Option<MappingRow>,
}

impl UpdateMappingOp {
    fn row(&self) -> MappingRow {
        MappingRow {
            id: self.mapping_id,
            shard_map_id: self.shard_map_id,
            shard_id: self.new_shard_id,
            range: store::ShardRangeRow {
                low_raw: self.low_raw.clone(),
                high_raw: self.high_raw.clone(),
            },
            status: self.status,
            lock_owner_id: self.lock_owner_id,
        }
    }
}

#[async_trait]
impl ShardMapOperation for UpdateMappingOp {
    fn code(&self) -> OperationCode {
        if self.is_point {
            OperationCode::UpdatePointMapping
        } else {
            OperationCode::UpdateRangeMapping
        }
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: self.mapping_id }).await?;
        let existing = support::ensure_success(existing, format!("mapping {} does not exist", self.mapping_id))?;
        if let Some(StoreRow::Mapping(row)) = existing.rows.into_iter().next() {
            check_lock(&row, self.caller_lock_owner_id)?;
            self.previous_row = Some(row);
        }
        let mut shard_versions = HashMap::new();
        let original = support::bump_shard_version(&mut *txn, self.old_shard_id).await?;
        shard_versions.insert(self.old_shard_id, original.version);
        if self.new_shard_id != self.old_shard_id {
            let original = support::bump_shard_version(&mut *txn, self.new_shard_id).await?;
            shard_versions.insert(self.new_shard_id, original.version);
        }
        let result = txn.execute(StoreRequest::UpdateMapping(self.row())).await?;
        support::ensure_success(result, "mapping update rejected".to_string())?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, shard_versions)?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let location = support::shard_location(ctx, self.old_shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        if self.old_shard_id == self.new_shard_id {
            txn.execute(StoreRequest::UpdateMapping(self.row())).await.ok();
        } else {
            txn.execute(StoreRequest::RemoveMapping { id: self.mapping_id }).await.ok();
        }
        txn.commit().await?;
        Ok(())
    }

    async fn local_target(&mut self, ctx: &OpContext) -> PhaseResult {
        if self.old_shard_id == self.new_shard_id {
            return Ok(());
        }
        let location = support::shard_location(ctx, self.new_shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::AddMapping(self.row())).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn update_cache(&mut self, ctx: &OpContext) -> PhaseResult {
        let snapshot = support::row_to_snapshot(&self.row(), self.key_type)?;
        ctx.cache
            .add_or_update(self.shard_map_id, snapshot, cache::TtlPolicy::ResetTtl)?;
        Ok(())
    }

    async fn undo_local_target(&mut self, ctx: &OpContext) -> PhaseResult {
        if self.old_shard_id == self.new_shard_id {
            return Ok(());
        }
        let location = support::shard_location(ctx, self.new_shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::RemoveMapping { id: self.mapping_id }).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn undo_local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(previous) = self.previous_row.clone() else { return Ok(()) };
        let location = support::shard_location(ctx, self.old_shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        if self.old_shard_id == self.new_shard_id {
            txn.execute(StoreRequest::UpdateMapping(previous)).await.ok();
        } else {
            txn.execute(StoreRequest::AddMapping(previous)).await.ok();
        }
        txn.commit().await?;
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(previous) = self.previous_row.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::UpdateMapping(previous)).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        support::undo_shard_version_bump(ctx, self.old_shard_id).await;
        if self.new_shard_id != self.old_shard_id {
            support::undo_shard_version_bump(ctx, self.new_shard_id).await;
        }
        Ok(())
    }
}

/// Covers `RemoveRangeMapping`/`RemovePointMapping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveMappingOp {
    pub operation_id: Uuid,
    pub mapping_id: Uuid,
    pub shard_map_id: Uuid,
    pub shard_id: Uuid,
    pub caller_lock_owner_id: Uuid,
    pub is_point: bool,
    /// The row `global_pre` removed, captured so the undo chain can put it
    /// back verbatim. Not part of the recovery intent: a replayed undo
    /// re-derives it from the store instead (see `undo_global_post`).
    #[serde(skip)]
    pub removed_row: Option<MappingRow>,
}

impl RemoveMappingOp {
    pub fn new(shard_map_id: Uuid, shard_id: Uuid, mapping_id: Uuid, caller_lock_owner_id: Uuid, is_point: bool) -> Self {
        RemoveMappingOp {
            operation_id: Uuid::new_v4(),
            mapping_id,
            shard_map_id,
            shard_id,
            caller_lock_owner_id,
            is_point,
            removed_row: None,
        }
    }
}

#[async_trait]
impl ShardMapOperation for RemoveMappingOp {
    fn code(&self) -> OperationCode {
        if self.is_point {
            OperationCode::RemovePointMapping
        } else {
            OperationCode::RemoveRangeMapping
        }
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: self.mapping_id }).await?;
        let existing = support::ensure_success(existing, format!("mapping {} does not exist", self.mapping_id))?;
        let row = match existing.rows.into_iter().next() {
            Some(StoreRow::Mapping(row)) => row,
            _ => unreachable!("GetMappingById on success always returns one Mapping row"),
        };
        check_lock(&row, self.caller_lock_owner_id)?;
        self.removed_row = Some(row);
        let original = support::bump_shard_version(&mut *txn, self.shard_id).await?;
        let mut shard_versions = HashMap::new();
        shard_versions.insert(self.shard_id, original.version);
        let result = txn.execute(StoreRequest::RemoveMapping { id: self.mapping_id }).await?;
        support::ensure_success(result, format!("mapping {} does not exist", self.mapping_id))?;
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

    async fn update_cache(&mut self, ctx: &OpContext) -> PhaseResult {
        // Best-effort: the cache has no direct "remove by mapping id" index,
        // only by key, so a stale entry simply expires on its own TTL.
        let _ = ctx;
        Ok(())
    }

    async fn undo_local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(row) = self.removed_row.clone() else { return Ok(()) };
        let location = support::shard_location(ctx, self.shard_id).await?;
        let local = ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local.begin().await?;
        txn.execute(StoreRequest::AddMapping(row)).await.ok();
        txn.commit().await?;
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(row) = self.removed_row.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::AddMapping(row)).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        support::undo_shard_version_bump(ctx, self.shard_id).await;
        Ok(())
    }
}

/// `LockMapping`/`UnlockMapping`: flips the mapping's `lock_owner_id` in the
/// global catalog only. Lock state gates writes through the operation
/// engine (see `check_lock`); it is not consulted on the read path, so it is
/// not mirrored into local catalogs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMappingOp {
    pub operation_id: Uuid,
    pub mapping_id: Uuid,
    pub lock_owner_id: Uuid,
}

impl LockMappingOp {
    pub fn new(mapping_id: Uuid, lock_owner_id: Uuid) -> Self {
        LockMappingOp {
            operation_id: Uuid::new_v4(),
            mapping_id,
            lock_owner_id,
        }
    }
}

#[async_trait]
impl ShardMapOperation for LockMappingOp {
    fn code(&self) -> OperationCode {
        OperationCode::LockMapping
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: self.mapping_id }).await?;
        let existing = support::ensure_success(existing, format!("mapping {} does not exist", self.mapping_id))?;
        let mut row = match existing.rows.into_iter().next() {
            Some(StoreRow::Mapping(row)) => row,
            _ => unreachable!("GetMappingById on success always returns one Mapping row"),
        };
        if row.lock_owner_id != Uuid::nil() {
            return error::RejectedSnafu {
                code: store::ResultCode::MappingLockMismatch,
                what: format!("mapping {} is already locked", self.mapping_id),
            }
            .fail();
        }
        row.lock_owner_id = self.lock_owner_id;
        let result = txn.execute(StoreRequest::UpdateMapping(row)).await?;
        support::ensure_success(result, "lock rejected".to_string())?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: self.mapping_id }).await?;
        if let Some(StoreRow::Mapping(mut row)) = existing.rows.into_iter().next() {
            if row.lock_owner_id == self.lock_owner_id {
                row.lock_owner_id = Uuid::nil();
                txn.execute(StoreRequest::UpdateMapping(row)).await.ok();
            }
        }
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockMappingOp {
    pub operation_id: Uuid,
    pub mapping_id: Uuid,
    pub caller_lock_owner_id: Uuid,
}

impl UnlockMappingOp {
    pub fn new(mapping_id: Uuid, caller_lock_owner_id: Uuid) -> Self {
        UnlockMappingOp {
            operation_id: Uuid::new_v4(),
            mapping_id,
            caller_lock_owner_id,
        }
    }
}

#[async_trait]
impl ShardMapOperation for UnlockMappingOp {
    fn code(&self) -> OperationCode {
        OperationCode::UnlockMapping
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: self.mapping_id }).await?;
        let existing = support::ensure_success(existing, format!("mapping {} does not exist", self.mapping_id))?;
        let mut row = match existing.rows.into_iter().next() {
            Some(StoreRow::Mapping(row)) => row,
            _ => unreachable!("GetMappingById on success always returns one Mapping row"),
        };
        check_lock(&row, self.caller_lock_owner_id)?;
        row.lock_owner_id = Uuid::nil();
        let result = txn.execute(StoreRequest::UpdateMapping(row)).await?;
        support::ensure_success(result, "unlock rejected".to_string())?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: self.mapping_id }).await?;
        if let Some(StoreRow::Mapping(mut row)) = existing.rows.into_iter().next() {
            if row.lock_owner_id == Uuid::nil() {
                row.lock_owner_id = self.caller_lock_owner_id;
                txn.execute(StoreRequest::UpdateMapping(row)).await.ok();
            }
        }
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}
