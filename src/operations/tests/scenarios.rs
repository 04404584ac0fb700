//! End-to-end operation-engine tests against the in-memory store, covering
//! the scenarios in spec.md §8.

use std::sync::Arc;

use async_trait::async_trait;
use cache::MappingCache;
use key_algebra::{Key, KeyType, KeyValue};
use operations::{
    ops::{AddMappingOp, AddShardMapOp, AddShardOp, LockMappingOp, MergeMappingsOp, RemoveMappingOp, SplitMappingOp, UpdateMappingOp},
    Error, OpContext, OperationCode, OperationEngine, PhaseResult, ShardMapOperation,
};
use retry::ExponentialBackoffPolicy;
use store::{mem::{MemGlobalStore, MemLocalStoreFactory}, MappingStatus, ShardLocation, ShardMapKind};
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

fn guid_key(v: Uuid) -> Vec<u8> {
    Key::Value(KeyType::Guid, KeyValue::Guid(v)).to_raw_bytes().unwrap()
}

async fn add_shard(ctx: &OpContext, engine: &OperationEngine, shard_map_id: Uuid, server: &str) -> Uuid {
    let mut op = AddShardOp::new(shard_map_id, ShardLocation::new(server, "db"));
    let shard_id = op.shard_id;
    engine.execute(op, None).await.unwrap();
    let _ = ctx;
    shard_id
}

#[tokio::test]
async fn overlap_rejection_exactly_one_of_two_concurrent_adds_succeeds() {
    let ctx = make_ctx();
    let engine = Arc::new(OperationEngine::new(ctx.clone()));

    let mut add_map = AddShardMapOp::new("Orders", ShardMapKind::Range, KeyType::Int64);
    let shard_map_id = add_map.shard_map_id;
    engine.execute(add_map, None).await.unwrap();
    let shard_a = add_shard(&ctx, &engine, shard_map_id, "srv1").await;
    let shard_b = add_shard(&ctx, &engine, shard_map_id, "srv2").await;

    let op_a = AddMappingOp::new(shard_map_id, shard_a, KeyType::Int64, int_key(0), Some(int_key(100)), false);
    let op_b = AddMappingOp::new(shard_map_id, shard_b, KeyType::Int64, int_key(50), Some(int_key(150)), false);

    let engine_a = engine.clone();
    let engine_b = engine.clone();
    let (result_a, result_b) = tokio::join!(
        tokio::spawn(async move { engine_a.execute(op_a, None).await }),
        tokio::spawn(async move { engine_b.execute(op_b, None).await }),
    );
    let result_a = result_a.unwrap();
    let result_b = result_b.unwrap();

    assert!(result_a.is_ok() != result_b.is_ok(), "exactly one of the two overlapping adds must succeed");
    let failed = if result_a.is_err() { result_a } else { result_b };
    match failed.unwrap_err() {
        Error::Rejected { code, .. } => assert_eq!(code, store::ResultCode::MappingRangeAlreadyMapped),
        other => panic!("expected Rejected(MappingRangeAlreadyMapped), got {other:?}"),
    }
}

#[tokio::test]
async fn split_then_merge_reconstructs_the_original_mapping() {
    let ctx = make_ctx();
    let engine = OperationEngine::new(ctx.clone());

    let mut add_map = AddShardMapOp::new("Users", ShardMapKind::Range, KeyType::Guid);
    let shard_map_id = add_map.shard_map_id;
    engine.execute(add_map, None).await.unwrap();
    let shard_a = add_shard(&ctx, &engine, shard_map_id, "srv1").await;

    let g0 = Uuid::from_u128(0);
    let g5 = Uuid::from_u128(5);
    let g9 = Uuid::from_u128(9);

    let add = AddMappingOp::new(shard_map_id, shard_a, KeyType::Guid, guid_key(g0), Some(guid_key(g9)), false);
    let mapping_id = add.mapping_id;
    engine.execute(add, None).await.unwrap();

    let split = SplitMappingOp::new(shard_map_id, shard_a, mapping_id, KeyType::Guid, guid_key(g5));
    let (left_id, right_id) = (split.left_id, split.right_id);
    engine.execute(split, None).await.unwrap();

    let merge = MergeMappingsOp::new(shard_map_id, shard_a, left_id, right_id);
    let merged_id = merge.merged_id;
    engine.execute(merge, None).await.unwrap();

    let mut txn = ctx.global_store.begin().await.unwrap();
    let result = txn
        .execute(store::StoreRequest::GetMappingById { id: merged_id })
        .await
        .unwrap();
    let row = match result.rows.into_iter().next() {
        Some(store::StoreRow::Mapping(row)) => row,
        _ => panic!("merged mapping missing"),
    };
    assert_eq!(row.range.low_raw, guid_key(g0));
    assert_eq!(row.range.high_raw, Some(guid_key(g9)));
    assert_eq!(row.shard_id, shard_a);
}

#[tokio::test]
async fn split_then_merge_preserves_lock_owner_and_offline_status() {
    let ctx = make_ctx();
    let engine = OperationEngine::new(ctx.clone());

    let mut add_map = AddShardMapOp::new("Locked2", ShardMapKind::Range, KeyType::Int64);
    let shard_map_id = add_map.shard_map_id;
    engine.execute(add_map, None).await.unwrap();
    let shard_a = add_shard(&ctx, &engine, shard_map_id, "srv1").await;

    let add = AddMappingOp::new(shard_map_id, shard_a, KeyType::Int64, int_key(0), Some(int_key(100)), false);
    let mapping_id = add.mapping_id;
    engine.execute(add, None).await.unwrap();

    let owner = Uuid::new_v4();
    let update = UpdateMappingOp {
        operation_id: Uuid::new_v4(),
        mapping_id,
        shard_map_id,
        old_shard_id: shard_a,
        new_shard_id: shard_a,
        key_type: KeyType::Int64,
        low_raw: int_key(0),
        high_raw: Some(int_key(100)),
        status: MappingStatus::Offline,
        lock_owner_id: owner,
        caller_lock_owner_id: Uuid::nil(),
        is_point: false,
        previous_row: None,
    };
    engine.execute(update, None).await.unwrap();

    let split = SplitMappingOp::new(shard_map_id, shard_a, mapping_id, KeyType::Int64, int_key(50));
    let (left_id, right_id) = (split.left_id, split.right_id);
    engine.execute(split, None).await.unwrap();

    let mut txn = ctx.global_store.begin().await.unwrap();
    let left_result = txn.execute(store::StoreRequest::GetMappingById { id: left_id }).await.unwrap();
    txn.commit().await.unwrap();
    let left_row = match left_result.rows.into_iter().next() {
        Some(store::StoreRow::Mapping(row)) => row,
        _ => panic!("left half missing"),
    };
    assert_eq!(left_row.status, MappingStatus::Offline, "split must carry the original status into both halves");
    assert_eq!(left_row.lock_owner_id, owner, "split must carry the original lock owner into both halves");

    let merge = MergeMappingsOp::new(shard_map_id, shard_a, left_id, right_id);
    let merged_id = merge.merged_id;
    engine.execute(merge, None).await.unwrap();

    let mut txn = ctx.global_store.begin().await.unwrap();
    let result = txn.execute(store::StoreRequest::GetMappingById { id: merged_id }).await.unwrap();
    txn.commit().await.unwrap();
    let row = match result.rows.into_iter().next() {
        Some(store::StoreRow::Mapping(row)) => row,
        _ => panic!("merged mapping missing"),
    };
    assert_eq!(row.status, MappingStatus::Offline, "merge must preserve the halves' common status");
    assert_eq!(row.lock_owner_id, owner, "merge must preserve the halves' common lock owner");
}

/// Wraps an inner operation and fails right after `local_source`, modeling
/// spec.md §8 scenario 4's "inject a terminal failure after LocalSource".
struct CrashAfterLocalSource<O> {
    inner: O,
}

#[async_trait]
impl<O: ShardMapOperation + Send> ShardMapOperation for CrashAfterLocalSource<O> {
    fn code(&self) -> OperationCode {
        self.inner.code()
    }

    fn operation_id(&self) -> Uuid {
        self.inner.operation_id()
    }

    async fn global_pre(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.global_pre(ctx).await
    }

    async fn local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.local_source(ctx).await?;
        operations::error::RejectedSnafu {
            code: store::ResultCode::StorageOperationFailure,
            what: "injected crash after LocalSource".to_string(),
        }
        .fail()
    }

    async fn local_target(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.local_target(ctx).await
    }

    async fn global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.global_post(ctx).await
    }

    async fn update_cache(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.update_cache(ctx).await
    }

    async fn undo_local_target(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.undo_local_target(ctx).await
    }

    async fn undo_local_source(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.undo_local_source(ctx).await
    }

    async fn undo_global_post(&mut self, ctx: &OpContext) -> PhaseResult {
        self.inner.undo_global_post(ctx).await
    }
}

#[tokio::test]
async fn crash_between_local_and_global_runs_undo_and_restores_prior_state() {
    let ctx = make_ctx();
    let engine = OperationEngine::new(ctx.clone());

    let mut add_map = AddShardMapOp::new("Accounts", ShardMapKind::Range, KeyType::Int64);
    let shard_map_id = add_map.shard_map_id;
    engine.execute(add_map, None).await.unwrap();
    let shard_a = add_shard(&ctx, &engine, shard_map_id, "srv1").await;

    let add = AddMappingOp::new(shard_map_id, shard_a, KeyType::Int64, int_key(0), Some(int_key(100)), false);
    let mapping_id = add.mapping_id;
    engine.execute(add, None).await.unwrap();

    let remove = RemoveMappingOp::new(shard_map_id, shard_a, mapping_id, Uuid::nil(), false);
    let wrapped = CrashAfterLocalSource { inner: remove };
    let result = engine.execute(wrapped, None).await;
    assert!(result.is_err(), "the injected crash must surface to the caller");

    let mut txn = ctx.global_store.begin().await.unwrap();
    let still_there = txn
        .execute(store::StoreRequest::GetMappingById { id: mapping_id })
        .await
        .unwrap();
    assert!(still_there.success, "undo must restore the mapping removed by GlobalPre");
}

#[tokio::test]
async fn lock_enforcement_rejects_mismatched_owner_and_allows_matching_owner() {
    let ctx = make_ctx();
    let engine = OperationEngine::new(ctx.clone());

    let mut add_map = AddShardMapOp::new("Locked", ShardMapKind::Range, KeyType::Int64);
    let shard_map_id = add_map.shard_map_id;
    engine.execute(add_map, None).await.unwrap();
    let shard_a = add_shard(&ctx, &engine, shard_map_id, "srv1").await;

    let add = AddMappingOp::new(shard_map_id, shard_a, KeyType::Int64, int_key(0), Some(int_key(100)), false);
    let mapping_id = add.mapping_id;
    engine.execute(add, None).await.unwrap();

    let owner_1 = Uuid::new_v4();
    let owner_2 = Uuid::new_v4();
    let lock = LockMappingOp::new(mapping_id, owner_1);
    engine.execute(lock, None).await.unwrap();

    let bad_update = UpdateMappingOp {
        operation_id: Uuid::new_v4(),
        mapping_id,
        shard_map_id,
        old_shard_id: shard_a,
        new_shard_id: shard_a,
        key_type: KeyType::Int64,
        low_raw: int_key(0),
        high_raw: Some(int_key(100)),
        status: MappingStatus::Online,
        lock_owner_id: owner_1,
        caller_lock_owner_id: owner_2,
        is_point: false,
        previous_row: None,
    };
    let err = engine.execute(bad_update, None).await.unwrap_err();
    match err {
        Error::Rejected { code, .. } => assert_eq!(code, store::ResultCode::MappingLockMismatch),
        other => panic!("expected MappingLockMismatch, got {other:?}"),
    }

    let good_update = UpdateMappingOp {
        operation_id: Uuid::new_v4(),
        mapping_id,
        shard_map_id,
        old_shard_id: shard_a,
        new_shard_id: shard_a,
        key_type: KeyType::Int64,
        low_raw: int_key(0),
        high_raw: Some(int_key(100)),
        status: MappingStatus::Online,
        lock_owner_id: owner_1,
        caller_lock_owner_id: owner_1,
        is_point: false,
        previous_row: None,
    };
    engine.execute(good_update, None).await.unwrap();
}
