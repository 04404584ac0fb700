use operations::ops::{
    AddMappingOp, AddSchemaInfoOp, AddShardMapOp, AddShardOp, AttachShardOp, DetachShardOp,
    LockMappingOp, MergeMappingsOp, RemoveMappingOp, RemoveSchemaInfoOp, RemoveShardMapOp,
    RemoveShardOp, ReplaceMappingsOp, SplitMappingOp, UnlockMappingOp, UpdateMappingOp,
    UpdateSchemaInfoOp, UpdateShardOp, UpgradeStoreOp,
};
use operations::{OperationEngine, Phase};
use store::{GlobalStore, StoreRequest, StoreRow};

use crate::error::{IntentDeserializationSnafu, UnknownOperationCodeSnafu};
use crate::Result;

/// Replays every pending-log row's undo chain and clears it (spec.md §4.F:
/// "on startup, or on demand, read every row in the pending-operation log
/// and run only its undo chain -- never redo the forward phases"). Safe to
/// call repeatedly and safe to call against a catalog with nothing pending.
pub async fn recover_pending_operations(
    global_store: &dyn GlobalStore,
    engine: &OperationEngine,
) -> Result<usize> {
    let mut txn = global_store.begin().await?;
    let result = txn.execute(StoreRequest::GetPendingOperations).await?;
    txn.commit().await?;

    let rows: Vec<_> = result
        .rows
        .into_iter()
        .filter_map(|row| match row {
            StoreRow::PendingOperation(row) => Some(row),
            _ => None,
        })
        .collect();

    let count = rows.len();
    for row in rows {
        let operation_id = row.operation_id;
        replay_one(engine, &row).await?;
        // Every op's own undo_global_post already removes its pending-log
        // row on the paths that mutate global state; this call is the
        // backstop for the two codes that never do (UpgradeStore is a
        // monotonic version bump, ReplaceMappings is recovery's own repair
        // step) and is a harmless no-op for every other code.
        let mut txn = global_store.begin().await?;
        txn.execute(StoreRequest::RemovePendingOperation { operation_id }).await?;
        txn.commit().await?;
    }
    Ok(count)
}

macro_rules! replay {
    ($engine:expr, $row:expr, $ty:ty) => {{
        let op: $ty = serde_json::from_str(&$row.intent).map_err(|source| {
            IntentDeserializationSnafu {
                operation_id: $row.operation_id,
                source,
            }
            .build()
        })?;
        // `undo_start_state` is only ever written by this engine (see
        // `operations::support::advance_undo_start_state`), but a row from
        // an older build or a hand-edited one that fails to parse still
        // needs undoing -- fall back to the full chain rather than skip it.
        let start = Phase::from_str(&$row.undo_start_state).unwrap_or(Phase::UndoLocalTarget);
        $engine.run_undo_from(op, start).await;
    }};
}

async fn replay_one(engine: &OperationEngine, row: &store::PendingLogRow) -> Result<()> {
    match row.operation_code.as_str() {
        "AddShardMap" => replay!(engine, row, AddShardMapOp),
        "RemoveShardMap" => replay!(engine, row, RemoveShardMapOp),
        "AddShard" => replay!(engine, row, AddShardOp),
        "UpdateShard" => replay!(engine, row, UpdateShardOp),
        "RemoveShard" => replay!(engine, row, RemoveShardOp),
        "AttachShard" => replay!(engine, row, AttachShardOp),
        "DetachShard" => replay!(engine, row, DetachShardOp),
        "AddRangeMapping" | "AddPointMapping" => replay!(engine, row, AddMappingOp),
        "UpdateRangeMapping" | "UpdatePointMapping" => replay!(engine, row, UpdateMappingOp),
        "RemoveRangeMapping" | "RemovePointMapping" => replay!(engine, row, RemoveMappingOp),
        "SplitMapping" => replay!(engine, row, SplitMappingOp),
        "MergeMappings" => replay!(engine, row, MergeMappingsOp),
        "ReplaceMappings" => replay!(engine, row, ReplaceMappingsOp),
        "LockMapping" => replay!(engine, row, LockMappingOp),
        "UnlockMapping" => replay!(engine, row, UnlockMappingOp),
        "AddSchemaInfo" => replay!(engine, row, AddSchemaInfoOp),
        "RemoveSchemaInfo" => replay!(engine, row, RemoveSchemaInfoOp),
        "UpdateSchemaInfo" => replay!(engine, row, UpdateSchemaInfoOp),
        "UpgradeStore" => replay!(engine, row, UpgradeStoreOp),
        other => {
            return UnknownOperationCodeSnafu {
                operation_id: row.operation_id,
                code: other.to_string(),
            }
            .fail()
        }
    }
    Ok(())
}
