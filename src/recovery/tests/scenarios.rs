//! End-to-end recovery-crate tests against the in-memory store: detect/
//! resolve (spec.md §8 scenario 5) and pending-log crash replay (§4.F).

use std::sync::Arc;

use cache::MappingCache;
use key_algebra::{Key, KeyType, KeyValue};
use operations::{
    ops::{AddMappingOp, AddShardMapOp, AddShardOp},
    OpContext, OperationEngine, ShardMapOperation,
};
use recovery::{DiffState, MappingDifferenceResolution, RecoveryManager};
use retry::ExponentialBackoffPolicy;
use store::{
    mem::{MemGlobalStore, MemLocalStoreFactory},
    GlobalStore, LocalStoreFactory, MappingRow, MappingStatus, ShardLocation, ShardMapKind, ShardRangeRow, StoreRequest, StoreRow,
};
use uuid::Uuid;

fn make_ctx() -> OpContext {
    OpContext {
        global_store: Arc::new(MemGlobalStore::new()),
        local_store_factory: Arc::new(MemLocalStoreFactory::new()),
        cache: Arc::new(MappingCache::new()),
        retry_policy: Arc::new(ExponentialBackoffPolicy {
            max_attempts: 2,
            ..Default::default()
        }),
        log: logger::nop_logger(),
    }
}

fn int_key(v: i64) -> Vec<u8> {
    Key::Value(KeyType::Int64, KeyValue::Int64(v)).to_raw_bytes().unwrap()
}

async fn add_shard_map(ctx: &OpContext, engine: &OperationEngine) -> Uuid {
    let op = AddShardMapOp::new("Orders", ShardMapKind::Range, KeyType::Int64);
    let shard_map_id = op.shard_map_id;
    engine.execute(op, None).await.unwrap();
    let _ = ctx;
    shard_map_id
}

async fn add_shard(engine: &OperationEngine, shard_map_id: Uuid, server: &str) -> (Uuid, ShardLocation) {
    let location = ShardLocation::new(server, "db");
    let op = AddShardOp::new(shard_map_id, location.clone());
    let shard_id = op.shard_id;
    engine.execute(op, None).await.unwrap();
    (shard_id, location)
}

#[tokio::test]
async fn detect_and_resolve_keep_shard_mapping_promotes_local_only_mapping() {
    let ctx = make_ctx();
    let engine = OperationEngine::new(ctx.clone());
    let shard_map_id = add_shard_map(&ctx, &engine).await;
    let (shard_id, location) = add_shard(&engine, shard_map_id, "srv1").await;

    // Simulate a crash that left the shard's local catalog ahead of the
    // global one: write the mapping only to the shard's LocalStore.
    let mapping_id = Uuid::new_v4();
    let local = ctx.local_store_factory.local_store(&location).await.unwrap();
    let mut txn = local.begin().await.unwrap();
    txn.execute(StoreRequest::AddMapping(MappingRow {
        id: mapping_id,
        shard_map_id,
        shard_id,
        range: ShardRangeRow {
            low_raw: int_key(0),
            high_raw: Some(int_key(100)),
        },
        status: MappingStatus::Online,
        lock_owner_id: Uuid::nil(),
    }))
    .await
    .unwrap();
    txn.commit().await.unwrap();

    let recovery = RecoveryManager::new(ctx.clone());
    let token = recovery.detect_mapping_differences(shard_map_id, shard_id).await.unwrap();
    let diffs = recovery.get_mapping_differences(token).unwrap();
    assert_eq!(diffs.len(), 1);
    assert!(matches!(diffs[0].state, DiffState::ShardOnly(_)));

    recovery
        .resolve_mapping_differences(token, MappingDifferenceResolution::KeepShardMapping)
        .await
        .unwrap();

    let mut txn = ctx.global_store.begin().await.unwrap();
    let result = txn
        .execute(StoreRequest::GetMappingsByRange {
            shard_map_id,
            low_raw: int_key(0),
            high_raw: Some(int_key(100)),
        })
        .await
        .unwrap();
    txn.commit().await.unwrap();
    assert_eq!(result.rows.len(), 1);
    if let StoreRow::Mapping(row) = &result.rows[0] {
        assert_eq!(row.shard_id, shard_id);
    } else {
        panic!("expected a mapping row");
    }

    // Token was consumed; a second resolve must fail.
    assert!(recovery
        .resolve_mapping_differences(token, MappingDifferenceResolution::Ignore)
        .await
        .is_err());
}

#[tokio::test]
async fn detect_and_resolve_keep_shard_map_mapping_rebuilds_local_catalog() {
    let ctx = make_ctx();
    let engine = OperationEngine::new(ctx.clone());
    let shard_map_id = add_shard_map(&ctx, &engine).await;
    let (shard_id, location) = add_shard(&engine, shard_map_id, "srv1").await;

    // Global has the mapping (added the normal way); then the shard's local
    // copy is wiped out from under it, simulating a shard that lost local
    // state and needs to be rebuilt from the authoritative global catalog.
    let op = AddMappingOp::new(shard_map_id, shard_id, KeyType::Int64, int_key(0), Some(int_key(100)), false);
    let mapping_id = op.mapping_id;
    engine.execute(op, None).await.unwrap();

    let local = ctx.local_store_factory.local_store(&location).await.unwrap();
    let mut txn = local.begin().await.unwrap();
    txn.execute(StoreRequest::RemoveMapping { id: mapping_id }).await.unwrap();
    txn.commit().await.unwrap();

    let recovery = RecoveryManager::new(ctx.clone());
    let token = recovery.detect_mapping_differences(shard_map_id, shard_id).await.unwrap();
    recovery.rebuild_mappings_on_shard(token, &[]).await.unwrap();

    let mut txn = local.begin().await.unwrap();
    let result = txn.execute(StoreRequest::GetMappingsByShard { shard_id }).await.unwrap();
    txn.commit().await.unwrap();
    assert_eq!(result.rows.len(), 1);
}

#[tokio::test]
async fn pending_log_replay_undoes_an_operation_that_never_finished() {
    let ctx = make_ctx();
    let engine = OperationEngine::new(ctx.clone());
    let shard_map_id = add_shard_map(&ctx, &engine).await;
    let (shard_id, _location) = add_shard(&engine, shard_map_id, "srv1").await;

    // Drive only `global_pre`, simulating a process that crashed before
    // `local_source` ran: the mapping exists globally and a pending-log row
    // names the in-flight operation, but no local catalog was ever touched.
    let mut op = AddMappingOp::new(shard_map_id, shard_id, KeyType::Int64, int_key(0), Some(int_key(100)), false);
    let mapping_id = op.mapping_id;
    op.global_pre(&ctx).await.unwrap();

    let mut txn = ctx.global_store.begin().await.unwrap();
    let pending = txn.execute(StoreRequest::GetPendingOperations).await.unwrap();
    txn.commit().await.unwrap();
    assert_eq!(pending.rows.len(), 1);

    let recovery = RecoveryManager::new(ctx.clone());
    let replayed = recovery.recover_pending().await.unwrap();
    assert_eq!(replayed, 1);

    let mut txn = ctx.global_store.begin().await.unwrap();
    let mapping = txn.execute(StoreRequest::GetMappingById { id: mapping_id }).await.unwrap();
    let pending_after = txn.execute(StoreRequest::GetPendingOperations).await.unwrap();
    txn.commit().await.unwrap();
    assert!(!mapping.success, "undo must remove the mapping global_pre added");
    assert!(pending_after.rows.is_empty(), "the pending-log row must be cleared");
}
