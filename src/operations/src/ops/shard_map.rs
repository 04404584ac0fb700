use std::collections::HashMap;

use async_trait::async_trait;
use cache::ShardMapMeta;
use key_algebra::KeyType;
use serde::{Deserialize, Serialize};
use store::{GlobalStore, ShardMapKind, ShardMapRow, StoreRequest};
use uuid::Uuid;

use crate::{
    context::OpContext, engine::PhaseResult, phase::OperationCode, support, ShardMapOperation,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddShardMapOp {
    pub operation_id: Uuid,
    pub shard_map_id: Uuid,
    pub name: String,
    pub kind: ShardMapKind,
    pub key_type: KeyType,
}

impl AddShardMapOp {
    pub fn new(name: impl Into<String>, kind: ShardMapKind, key_type: KeyType) -> Self {
        AddShardMapOp {
            operation_id: Uuid::new_v4(),
            shard_map_id: Uuid::new_v4(),
            name: name.into(),
            kind,
            key_type,
        }
    }
}

#[async_trait]
impl ShardMapOperation for AddShardMapOp {
    fn code(&self) -> OperationCode {
        OperationCode::AddShardMap
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let row = ShardMapRow {
            id: self.shard_map_id,
            name: self.name.clone(),
            kind: self.kind,
            key_type: self.key_type,
        };
        let mut txn = ctx.global_store.begin().await?;
        let result = txn.execute(StoreRequest::AddShardMap(row)).await?;
        support::ensure_success(result, format!("shard map {} already exists", self.name))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn update_cache(&mut self, ctx: &OpContext) -> PhaseResult {
        ctx.cache.add_shard_map(ShardMapMeta {
            id: self.shard_map_id,
            name: self.name.clone(),
            kind: support::shard_map_kind_from_store(self.kind),
            key_type: self.key_type,
        });
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        txn.execute(StoreRequest::RemoveShardMap { id: self.shard_map_id }).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveShardMapOp {
    pub operation_id: Uuid,
    pub shard_map_id: Uuid,
    pub name: String,
    /// Filled in from the row `global_pre` reads before removing it, so
    /// `undo_global_post` can put back an identical row. Recovery replaying
    /// from the serialized intent has this already; a freshly constructed
    /// op (via `new`) has it as a placeholder until `global_pre` runs.
    pub kind: ShardMapKind,
    pub key_type: KeyType,
}

impl RemoveShardMapOp {
    pub fn new(shard_map_id: Uuid, name: impl Into<String>, kind: ShardMapKind, key_type: KeyType) -> Self {
        RemoveShardMapOp {
            operation_id: Uuid::new_v4(),
            shard_map_id,
            name: name.into(),
            kind,
            key_type,
        }
    }
}

#[async_trait]
impl ShardMapOperation for RemoveShardMapOp {
    fn code(&self) -> OperationCode {
        OperationCode::RemoveShardMap
    }

    fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let existing = txn
            .execute(StoreRequest::GetShardMapByName { name: self.name.clone() })
            .await?;
        let existing = support::ensure_success(existing, format!("shard map {} does not exist", self.name))?;
        if let Some(store::StoreRow::ShardMap(row)) = existing.rows.into_iter().next() {
            self.kind = row.kind;
            self.key_type = row.key_type;
        }
        let shards = txn
            .execute(StoreRequest::GetShardsByMap { shard_map_id: self.shard_map_id })
            .await?;
        if !shards.rows.is_empty() {
            return support::ensure_success(
                store::StoreResult::failed(store::ResultCode::ShardHasMappings),
                format!("shard map {} still has shards attached", self.name),
            )
            .map(|_| ());
        }
        let result = txn.execute(StoreRequest::RemoveShardMap { id: self.shard_map_id }).await?;
        support::ensure_success(result, format!("shard map {} does not exist", self.name))?;
        let log_row = support::pending_log_row(self.operation_id, self.code(), self, HashMap::new())?;
        txn.execute(StoreRequest::AddPendingOperation(log_row)).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        support::clear_pending_log(ctx, self.operation_id).await
    }

    async fn update_cache(&mut self, ctx: &OpContext) -> PhaseResult {
        ctx.cache.remove_shard_map(&self.name);
        Ok(())
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        let mut txn = ctx.global_store.begin().await?;
        let row = store::ShardMapRow {
            id: self.shard_map_id,
            name: self.name.clone(),
            kind: self.kind,
            key_type: self.key_type,
        };
        txn.execute(StoreRequest::AddShardMap(row)).await.ok();
        txn.execute(StoreRequest::RemovePendingOperation { operation_id: self.operation_id })
            .await?;
        txn.commit().await?;
        Ok(())
    }
}
