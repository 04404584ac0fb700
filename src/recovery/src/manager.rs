use std::collections::HashMap;
use std::sync::Mutex;

use key_algebra::{KeyType, ShardRange};
use operations::ops::{AttachShardOp, DetachShardOp, NewMapping, ReplaceMappingsOp};
use operations::{support, OpContext, OperationEngine};
use store::{GlobalStore, MappingRow, ShardLocation, ShardRangeRow, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::diff;
use crate::error::{UnknownShardMapSnafu, UnknownTokenSnafu};
use crate::model::{DiffRange, DiffState, DiffToken, MappingDifferenceResolution};
use crate::pending;
use crate::Result;

fn mapping_row_for_shard(range: &ShardRangeRow, status: store::MappingStatus, shard_map_id: Uuid, shard_id: Uuid) -> MappingRow {
    MappingRow {
        id: Uuid::new_v4(),
        shard_map_id,
        shard_id,
        range: range.clone(),
        status,
        lock_owner_id: Uuid::nil(),
    }
}

/// Crash recovery and local/global reconciliation (spec.md §4.F): replays
/// pending-log undo chains on open, and detects/resolves disagreements
/// between a shard's local catalog and the global catalog's view of it.
///
/// `tokens` is the one process-local mutable state in this crate: a
/// `detect_mapping_differences` call stashes its result here under a fresh
/// id, which a later `resolve_mapping_differences`/`get_mapping_differences`
/// call looks up. A token never survives a process restart -- a crash
/// between detect and resolve just means the caller has to detect again.
pub struct RecoveryManager {
    ctx: OpContext,
    engine: OperationEngine,
    tokens: Mutex<HashMap<Uuid, DiffToken>>,
}

impl RecoveryManager {
    pub fn new(ctx: OpContext) -> Self {
        let engine = OperationEngine::new(ctx.clone());
        RecoveryManager {
            ctx,
            engine,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Replays every pending-log row's undo chain (spec.md §4.F/§4.H). Safe
    /// to call on a catalog with nothing pending; returns how many rows were
    /// found.
    pub async fn recover_pending(&self) -> Result<usize> {
        let count = pending::recover_pending_operations(self.ctx.global_store.as_ref(), &self.engine).await?;
        if count > 0 {
            logger::info!(self.ctx.log, "replayed pending-log undo chains on open"; "count" => count);
        }
        Ok(count)
    }

    /// Registers a shard not previously known to the global catalog,
    /// bringing its existing local mappings up into the global catalog
    /// verbatim. See [`AttachShardOp`] for the exact upgrade-by-design
    /// semantics.
    pub async fn attach_shard(&self, shard_map_id: Uuid, location: ShardLocation) -> Result<Uuid> {
        let op = AttachShardOp::new(shard_map_id, location);
        let shard_id = op.shard_id;
        self.engine.execute(op, None).await?;
        Ok(shard_id)
    }

    /// Removes a shard and every mapping pointing to it.
    pub async fn detach_shard(&self, shard_id: Uuid) -> Result<()> {
        self.engine.execute(DetachShardOp::new(shard_id), None).await
    }

    async fn shard_map_key_type(&self, shard_map_id: Uuid) -> Result<KeyType> {
        let mut txn = self.ctx.global_store.begin().await?;
        let result = txn.execute(StoreRequest::ListShardMaps).await?;
        txn.commit().await?;
        result
            .rows
            .into_iter()
            .find_map(|row| match row {
                StoreRow::ShardMap(row) if row.id == shard_map_id => Some(row.key_type),
                _ => None,
            })
            .ok_or_else(|| UnknownShardMapSnafu { shard_map_id }.build())
    }

    /// Runs the detect algorithm for one shard and stashes the result under
    /// a fresh token, returned for a later `get_mapping_differences`/
    /// `resolve_mapping_differences` call.
    pub async fn detect_mapping_differences(&self, shard_map_id: Uuid, shard_id: Uuid) -> Result<Uuid> {
        let key_type = self.shard_map_key_type(shard_map_id).await?;
        let location = support::shard_location(&self.ctx, shard_id).await?;
        let local_store = self.ctx.local_store_factory.local_store(&location).await?;
        let differences = diff::detect(
            self.ctx.global_store.as_ref(),
            local_store.as_ref(),
            shard_map_id,
            shard_id,
            key_type,
        )
        .await?;

        let token_id = Uuid::new_v4();
        let token = DiffToken {
            token_id,
            shard_map_id,
            shard_id,
            key_type,
            differences,
        };
        self.tokens.lock().expect("token table poisoned").insert(token_id, token);
        Ok(token_id)
    }

    /// Returns the differences a prior `detect_mapping_differences` found,
    /// without consuming the token.
    pub fn get_mapping_differences(&self, token: Uuid) -> Result<Vec<DiffRange>> {
        self.tokens
            .lock()
            .expect("token table poisoned")
            .get(&token)
            .map(|t| t.differences.clone())
            .ok_or_else(|| UnknownTokenSnafu { token }.build())
    }

    /// Applies a resolution to every sub-range a `detect_mapping_differences`
    /// call found, consuming the token. `KeepShardMapMapping` rewrites the
    /// shard's local catalog to match the global one; `KeepShardMapping`
    /// rewrites the global catalog to match the shard; `Ignore` just drops
    /// the token.
    pub async fn resolve_mapping_differences(&self, token: Uuid, resolution: MappingDifferenceResolution) -> Result<()> {
        let token = self
            .tokens
            .lock()
            .expect("token table poisoned")
            .remove(&token)
            .ok_or_else(|| UnknownTokenSnafu { token }.build())?;

        match resolution {
            MappingDifferenceResolution::Ignore => Ok(()),
            MappingDifferenceResolution::KeepShardMapMapping => self.rewrite_local(&token, &[]).await,
            MappingDifferenceResolution::KeepShardMapping => self.rewrite_global(&token).await,
        }
    }

    /// Global wins: rewrites the shard's local catalog for every
    /// disagreeing sub-range, or only the sub-ranges named in
    /// `ranges_to_keep` when that list is non-empty. Applied directly
    /// against the shard's `LocalStore`, not through the operation engine --
    /// this is reconciliation's own repair step, outside the crash-recovery
    /// model (spec.md §4.F.Crash-model: reconciliation takes no cross-shard
    /// lock).
    async fn rewrite_local(&self, token: &DiffToken, ranges_to_keep: &[ShardRange]) -> Result<()> {
        let location = support::shard_location(&self.ctx, token.shard_id).await?;
        let local_store = self.ctx.local_store_factory.local_store(&location).await?;
        let mut txn = local_store.begin().await?;
        for diff in &token.differences {
            if !ranges_to_keep.is_empty() && !ranges_to_keep.contains(&diff.range) {
                continue;
            }
            match &diff.state {
                DiffState::ShardMapOnly(global_snapshot) => {
                    let range = support::range_to_row(&global_snapshot.range)?;
                    let row = mapping_row_for_shard(
                        &range,
                        support::mapping_status_to_store(global_snapshot.status),
                        token.shard_map_id,
                        token.shard_id,
                    );
                    txn.execute(StoreRequest::AddMapping(row)).await.ok();
                }
                DiffState::ShardOnly(local_snapshot) => {
                    txn.execute(StoreRequest::RemoveMapping { id: local_snapshot.id }).await.ok();
                }
                DiffState::Conflicting { shard_map_mapping, shard_mapping } => {
                    txn.execute(StoreRequest::RemoveMapping { id: shard_mapping.id }).await.ok();
                    let range = support::range_to_row(&shard_map_mapping.range)?;
                    let row = mapping_row_for_shard(
                        &range,
                        support::mapping_status_to_store(shard_map_mapping.status),
                        token.shard_map_id,
                        token.shard_id,
                    );
                    txn.execute(StoreRequest::AddMapping(row)).await.ok();
                }
            }
        }
        txn.commit().await?;
        Ok(())
    }

    /// Shard wins: rewrites the global catalog for every disagreeing
    /// sub-range in one `ReplaceMappingsOp`, reusing the operation engine so
    /// this repair gets the same retry/undo guarantees as any other global
    /// write.
    async fn rewrite_global(&self, token: &DiffToken) -> Result<()> {
        let mut remove_ids = Vec::new();
        let mut add = Vec::new();
        for diff in &token.differences {
            match &diff.state {
                DiffState::ShardMapOnly(global_snapshot) => {
                    remove_ids.push(global_snapshot.id);
                }
                DiffState::ShardOnly(local_snapshot) => {
                    add.push(new_mapping(local_snapshot, token.shard_id)?);
                }
                DiffState::Conflicting { shard_map_mapping, shard_mapping } => {
                    remove_ids.push(shard_map_mapping.id);
                    add.push(new_mapping(shard_mapping, token.shard_id)?);
                }
            }
        }
        if remove_ids.is_empty() && add.is_empty() {
            return Ok(());
        }
        let op = ReplaceMappingsOp::new(token.shard_map_id, remove_ids, add);
        self.engine.execute(op, None).await
    }

    /// Consumes an outstanding `detect_mapping_differences` token and keeps
    /// the shard-map's mapping (global wins) for the named sub-ranges,
    /// rewriting the shard's local catalog to match. An empty
    /// `ranges_to_keep` applies to every range the token found different,
    /// matching plain `KeepShardMapMapping`; a non-empty list lets the
    /// caller rebuild only part of what was detected, leaving the rest of
    /// the disagreement in place for a separate resolution.
    pub async fn rebuild_mappings_on_shard(&self, token: Uuid, ranges_to_keep: &[ShardRange]) -> Result<()> {
        let token = self
            .tokens
            .lock()
            .expect("token table poisoned")
            .remove(&token)
            .ok_or_else(|| UnknownTokenSnafu { token }.build())?;
        self.rewrite_local(&token, ranges_to_keep).await
    }

    /// Detects differences on `shard_id` and rebuilds its entire local
    /// catalog from the global view. Used by the bulk/whole-shard-map repair
    /// entry points below, which have no caller-supplied token or
    /// sub-range list to work from.
    async fn detect_and_rebuild_shard(&self, shard_map_id: Uuid, shard_id: Uuid) -> Result<()> {
        let token = self.detect_mapping_differences(shard_map_id, shard_id).await?;
        self.rebuild_mappings_on_shard(token, &[]).await
    }

    /// Bulk form of [`Self::rebuild_mappings_on_shard`] over an explicit set
    /// of shards: detects and rebuilds each shard's local catalog wholesale.
    pub async fn rebuild_mappings_on_shards(&self, shard_map_id: Uuid, shard_ids: &[Uuid]) -> Result<()> {
        for &shard_id in shard_ids {
            self.detect_and_rebuild_shard(shard_map_id, shard_id).await?;
        }
        Ok(())
    }

    /// The opposite direction: rebuilds the global catalog's view of every
    /// shard in the map from each shard's own local catalog
    /// (`KeepShardMapping`), used after the global catalog itself is lost or
    /// known-bad and every shard's local copy is trusted instead.
    pub async fn rebuild_mappings_on_shard_map_manager_from_shards(&self, shard_map_id: Uuid) -> Result<()> {
        let mut txn = self.ctx.global_store.begin().await?;
        let shards = txn.execute(StoreRequest::GetShardsByMap { shard_map_id }).await?;
        txn.commit().await?;
        for row in shards.rows {
            if let StoreRow::Shard(shard) = row {
                let token = self.detect_mapping_differences(shard_map_id, shard.id).await?;
                self.resolve_mapping_differences(token, MappingDifferenceResolution::KeepShardMapping)
                    .await?;
            }
        }
        Ok(())
    }
}

fn new_mapping(snapshot: &cache::MappingSnapshot, shard_id: Uuid) -> Result<NewMapping> {
    let range = support::range_to_row(&snapshot.range)?;
    Ok(NewMapping {
        shard_id,
        low_raw: range.low_raw,
        high_raw: range.high_raw,
        status: support::mapping_status_to_store(snapshot.status),
    })
}
