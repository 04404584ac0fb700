use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use store::{GlobalStore, LocalStore, LocalStoreFactory, ShardLocation, ShardRow, ShardStatus, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::{context::OpContext, engine::PhaseResult, phase::OperationCode, support, ShardMapOperation};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddShardOp {
    pub operation_id: Uuid,
    pub shard_id: Uuid,
    pub shard_map_id: Uuid,
    pub location: ShardLocation,
}

impl AddShardOp {
    pub fn new(shard_map_id: Uuid, location: ShardLocation) -> Self {
        AddShardOp {
            operation_id: Uuid::new_v4(),
            shard_id: Uuid::new_v4(),
            shard_map_id,
            location,
        }
    }
}

#[async_trait]
impl ShardMapOperation for AddShardOp {
    fn code(&self) -> OperationCode {
        OperationCode::AddShard
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let row = ShardRow {
            id: self.shard_id,
            version: 0,
            shard_map_id: self.shard_map_id,
            location: self.location.clone(),
            status: ShardStatus::ONLINE,
        };
        let mut txn = ctx.global_store.begin().await?;
        let result = txn.execute(StoreRequest::AddShard(row)).await?;
        support::ensure_success(result, format!("shard at {:?} already exists", self.location))?;
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
        txn.execute(StoreRequest::RemoveShard { id: self.shard_id }).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateShardOp {
    pub operation_id: Uuid,
    pub shard_id: Uuid,
    pub shard_map_id: Uuid,
    pub location: ShardLocation,
    pub status: ShardStatus,
    pub expected_version: u64,
    /// The row before this update, captured by `global_pre` so undo can put
    /// it back verbatim. Not part of the recovery intent: a replayed undo
    /// re-reads the current row instead (see `undo_global_post`).
    #[serde(skip)]
    pub previous_row: Option<ShardRow>,
}

#[async_trait]
impl ShardMapOperation for UpdateShardOp {
    fn code(&self) -> OperationCode {
        OperationCode::UpdateShard
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetShardById { id: self.shard_id }).await?;
        let existing = support::ensure_success(existing, format!("shard {} does not exist", self.shard_id))?;
        self.previous_row = existing.rows.into_iter().next().and_then(|row| match row {
            StoreRow::Shard(row) => Some(row),
            _ => None,
        });
        let bump = txn
            .execute(StoreRequest::BumpShardVersion {
                id: self.shard_id,
                expected_version: self.expected_version,
            })
            .await?;
        support::ensure_success(bump, format!("shard {} version changed concurrently", self.shard_id))?;
        let row = ShardRow {
            id: self.shard_id,
            version: self.expected_version + 1,
            shard_map_id: self.shard_map_id,
            location: self.location.clone(),
            status: self.status,
        };
        let result = txn.execute(StoreRequest::UpdateShard(row)).await?;
        support::ensure_success(result, format!("shard {} does not exist", self.shard_id))?;
        let mut versions = HashMap::new();
        versions.insert(self.shard_id, self.expected_version);
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, versions)?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(row) = self.previous_row.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::UpdateShard(row)).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveShardOp {
    pub operation_id: Uuid,
    pub shard_id: Uuid,
    /// The row `global_pre` removed, captured so undo can put it back
    /// verbatim.
    #[serde(skip)]
    pub removed_row: Option<ShardRow>,
}

impl RemoveShardOp {
    pub fn new(shard_id: Uuid) -> Self {
        RemoveShardOp {
            operation_id: Uuid::new_v4(),
            shard_id,
            removed_row: None,
        }
    }
}

#[async_trait]
impl ShardMapOperation for RemoveShardOp {
    fn code(&self) -> OperationCode {
        OperationCode::RemoveShard
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn
            .execute(StoreRequest::GetMappingsByShard { shard_id: self.shard_id })
            .await?;
        if !existing.rows.is_empty() {
            return support::ensure_success(
                store::StoreResult::failed(store::ResultCode::ShardHasMappings),
                format!("shard {} still has mappings", self.shard_id),
            )
            .map(|_| ());
        }
        let shard = txn.execute(StoreRequest::GetShardById { id: self.shard_id }).await?;
        let shard = support::ensure_success(shard, format!("shard {} does not exist", self.shard_id))?;
        self.removed_row = shard.rows.into_iter().next().and_then(|row| match row {
            StoreRow::Shard(row) => Some(row),
            _ => None,
        });
        let result = txn.execute(StoreRequest::RemoveShard { id: self.shard_id }).await?;
        support::ensure_success(result, format!("shard {} does not exist", self.shard_id))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(row) = self.removed_row.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::AddShard(row)).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

/// Registers a shard not previously known to the global catalog and brings
/// its existing local mappings into the global catalog verbatim, per
/// spec.md §4.C: "`AttachShard` upgrades any older mappings present on the
/// shard to the catalog's version by design; subsequent reconciliation is a
/// separate step and not automatic." Callers that need a consistency check
/// first should run `RecoveryManager::detect_mapping_differences` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachShardOp {
    pub operation_id: Uuid,
    pub shard_id: Uuid,
    pub shard_map_id: Uuid,
    pub location: ShardLocation,
    /// Mapping ids `local_source` copied up into the global catalog, so
    /// undo can remove exactly those and nothing the shard already had
    /// globally before this attach.
    #[serde(skip)]
    pub copied_mapping_ids: Vec<Uuid>,
}

impl AttachShardOp {
    pub fn new(shard_map_id: Uuid, location: ShardLocation) -> Self {
        AttachShardOp {
            operation_id: Uuid::new_v4(),
            shard_id: Uuid::new_v4(),
            shard_map_id,
            location,
            copied_mapping_ids: Vec::new(),
        }
    }
}

#[async_trait]
impl ShardMapOperation for AttachShardOp {
    fn code(&self) -> OperationCode {
        OperationCode::AttachShard
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let row = ShardRow {
            id: self.shard_id,
            version: 0,
            shard_map_id: self.shard_map_id,
            location: self.location.clone(),
            status: ShardStatus::ONLINE,
        };
        let mut txn = ctx.global_store.begin().await?;
        let result = txn.execute(StoreRequest::AddShard(row)).await?;
        support::ensure_success(result, format!("shard at {:?} already exists", self.location))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Silently overwrites any global mapping whose range matches a mapping
    /// already present on the shard's local catalog, by design (see the
    /// struct doc comment).
    async fn local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        let local = ctx.local_store_factory.local_store(&self.location).await?;
        let mut txn = local.begin().await?;
        let result = txn.execute(StoreRequest::GetMappingsByShard { shard_id: self.shard_id }).await?;
        let local_mappings: Vec<_> = result
            .rows
            .into_iter()
            .filter_map(|row| match row {
                StoreRow::Mapping(m) => Some(m),
                _ => None,
            })
            .collect();
        txn.commit().await?;

        self.copied_mapping_ids.clear();
        if local_mappings.is_empty() {
            return Ok(());
        }
        let mut global_txn = ctx.global_store.begin().await?;
        for mapping in local_mappings {
            self.copied_mapping_ids.push(mapping.id);
            global_txn.execute(StoreRequest::AddMapping(mapping)).await?;
        }
        global_txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        if self.copied_mapping_ids.is_empty() {
            return Ok(());
        }
        let mut txn = ctx.global_store.begin().await?;
        for id in self.copied_mapping_ids.drain(..) {
            txn.execute(StoreRequest::RemoveMapping { id }).await.ok();
        }
        txn.commit().await?;
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::RemoveShard { id: self.shard_id }).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

/// Removes a shard and, in the same global transaction, every mapping
/// pointing to it (spec.md §4.C: "`DetachShard` removes all mappings
/// pointing to the shard as part of the same global transaction").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachShardOp {
    pub operation_id: Uuid,
    pub shard_id: Uuid,
    /// Shard row and mappings `global_pre` removed, captured so undo can
    /// restore them verbatim.
    #[serde(skip)]
    pub removed_shard: Option<ShardRow>,
    #[serde(skip)]
    pub removed_mappings: Vec<store::MappingRow>,
}

impl DetachShardOp {
    pub fn new(shard_id: Uuid) -> Self {
        DetachShardOp {
            operation_id: Uuid::new_v4(),
            shard_id,
            removed_shard: None,
            removed_mappings: Vec::new(),
        }
    }
}

#[async_trait]
impl ShardMapOperation for DetachShardOp {
    fn code(&self) -> OperationCode {
        OperationCode::DetachShard
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let shard = txn.execute(StoreRequest::GetShardById { id: self.shard_id }).await?;
        let shard = support::ensure_success(shard, format!("shard {} does not exist", self.shard_id))?;
        self.removed_shard = shard.rows.into_iter().next().and_then(|row| match row {
            StoreRow::Shard(row) => Some(row),
            _ => None,
        });
        let mappings = txn
            .execute(StoreRequest::GetMappingsByShard { shard_id: self.shard_id })
            .await?;
        self.removed_mappings.clear();
        for row in mappings.rows {
            if let StoreRow::Mapping(m) = row {
                txn.execute(StoreRequest::RemoveMapping { id: m.id }).await?;
                self.removed_mappings.push(m);
            }
        }
        let result = txn.execute(StoreRequest::RemoveShard { id: self.shard_id }).await?;
        support::ensure_success(result, format!("shard {} does not exist", self.shard_id))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let Some(shard) = self.removed_shard.clone() else { return Ok(()) };
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::AddShard(shard)).await.ok();
        for mapping in self.removed_mappings.drain(..) {
            txn.execute(StoreRequest::AddMapping(mapping)).await.ok();
        }
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}
