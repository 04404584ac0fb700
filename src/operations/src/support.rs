use std::collections::HashMap;

use cache::{MappingSnapshot, MappingStatus as CacheMappingStatus, ShardMapKind as CacheShardMapKind};
use key_algebra::{Key, KeyType, ShardRange};
use store::{
    GlobalStore, MappingRow, MappingStatus, PendingLogRow, ShardMapKind, ShardRangeRow, ShardRow, StoreRequest,
    StoreResult, StoreRow,
};
use uuid::Uuid;

use crate::{context::OpContext, error::RejectedSnafu, phase::OperationCode, Phase, Result};

/// Opens a global store transaction, executes one request, commits, and
/// returns the result. Used by the metadata-only operations whose whole
/// effect fits in a single store call.
pub async fn one_shot(ctx: &OpContext, request: StoreRequest) -> Result<StoreResult> {
    let mut txn = ctx.global_store.begin().await?;
    let result = txn.execute(request).await?;
    txn.commit().await?;
    Ok(result)
}

/// Turns a business-logic failure (`StoreResult::success == false`) into a
/// [`crate::Error::Rejected`]. Store requests never raise these as `Err`
/// directly (only infrastructure failures do) — this is the seam where an
/// operation decides that the store said no.
pub fn ensure_success(result: StoreResult, what: impl Into<String>) -> Result<StoreResult> {
    if result.success {
        Ok(result)
    } else {
        Err(RejectedSnafu {
            code: result.code,
            what: what.into(),
        }
        .build())
    }
}

/// Removes an operation's pending-log row in its own transaction. This is
/// how `global_post` concludes for operations whose whole mutation already
/// happened in `global_pre` (spec.md §4.C: the pending-log row is the only
/// evidence an in-flight operation leaves behind once the catalog itself is
/// updated).
pub async fn clear_pending_log(ctx: &OpContext, operation_id: Uuid) -> Result<()> {
    one_shot(ctx, StoreRequest::RemovePendingOperation { operation_id }).await?;
    Ok(())
}

/// Resolves a shard id to the location its local catalog lives at.
pub async fn shard_location(ctx: &OpContext, shard_id: Uuid) -> Result<store::ShardLocation> {
    let result = one_shot(ctx, StoreRequest::GetShardById { id: shard_id }).await?;
    let result = ensure_success(result, format!("shard {shard_id} does not exist"))?;
    match result.rows.into_iter().next() {
        Some(store::StoreRow::Shard(row)) => Ok(row.location),
        _ => Err(RejectedSnafu {
            code: store::ResultCode::ShardDoesNotExist,
            what: format!("shard {shard_id} does not exist"),
        }
        .build()),
    }
}

pub fn pending_log_row(
    operation_id: Uuid,
    code: OperationCode,
    intent: &impl serde::Serialize,
    shard_versions: HashMap<Uuid, u64>,
) -> Result<PendingLogRow> {
    let intent = serde_json::to_string(intent).map_err(|e| {
        RejectedSnafu {
            code: store::ResultCode::InvalidArgument,
            what: format!("failed to serialize intent: {e}"),
        }
        .build()
    })?;
    Ok(PendingLogRow {
        operation_id,
        operation_code: format!("{code:?}"),
        // Only `global_pre` has run at this point, so a crash right now only
        // needs `undo_global_post` replayed (spec.md §4.C). The engine
        // advances this field forward as later phases are attempted (see
        // `advance_undo_start_state`).
        undo_start_state: Phase::UndoGlobalPost.as_str().to_string(),
        intent,
        original_shard_versions: shard_versions,
    })
}

/// Rewrites the `undo_start_state` of an in-flight operation's pending-log
/// row (spec.md §4.C). Called by the engine just before it attempts a phase
/// that might leave a partial effect, so a crash during that phase still
/// resumes undo from the right point. A missing row (the operation already
/// cleared its pending-log entry, or never wrote one) is not an error here --
/// there's nothing left to advance.
pub async fn advance_undo_start_state(ctx: &OpContext, operation_id: Uuid, phase: Phase) -> Result<()> {
    let mut txn = ctx.global_store.begin().await?;
    let existing = txn.execute(StoreRequest::GetPendingOperations).await?;
    let row = existing.rows.into_iter().find_map(|row| match row {
        StoreRow::PendingOperation(row) if row.operation_id == operation_id => Some(row),
        _ => None,
    });
    let Some(mut row) = row else {
        txn.commit().await?;
        return Ok(());
    };
    row.undo_start_state = phase.as_str().to_string();
    txn.execute(StoreRequest::UpdatePendingOperation(row)).await?;
    txn.commit().await?;
    Ok(())
}

/// Fetches a shard's current row and bumps its version by one within the
/// caller's transaction -- the price every mapping add/remove/update pays
/// against each shard it references (spec.md §3: "A shard's version
/// increments whenever any mapping referencing it is added/removed/
/// updated"). Returns the pre-bump row so the caller can read its prior
/// version into the pending-log's `original_shard_versions` and, if the op
/// itself is rejected before committing, the staged bump is simply discarded
/// along with the rest of the transaction.
pub async fn bump_shard_version(txn: &mut dyn store::StoreTransaction, shard_id: Uuid) -> Result<ShardRow> {
    let existing = txn.execute(StoreRequest::GetShardById { id: shard_id }).await?;
    let existing = ensure_success(existing, format!("shard {shard_id} does not exist"))?;
    let row = match existing.rows.into_iter().next() {
        Some(StoreRow::Shard(row)) => row,
        _ => {
            return Err(RejectedSnafu {
                code: store::ResultCode::ShardDoesNotExist,
                what: format!("shard {shard_id} does not exist"),
            }
            .build())
        }
    };
    let bump = txn
        .execute(StoreRequest::BumpShardVersion {
            id: shard_id,
            expected_version: row.version,
        })
        .await?;
    ensure_success(bump, format!("shard {shard_id} version changed concurrently"))?;
    Ok(row)
}

/// Best-effort undo of a [`bump_shard_version`] staged earlier by the same
/// operation: re-reads the shard's current row and decrements its version by
/// one, rather than replaying a snapshot captured at `global_pre` time, since
/// nothing else about the shard is expected to change from a mapping
/// mutation. Failures are swallowed like the other `.ok()` undo steps --
/// recovery owns cleanup if the pending-log row is still around.
pub async fn undo_shard_version_bump(ctx: &OpContext, shard_id: Uuid) {
    let Ok(mut txn) = ctx.global_store.begin().await else { return };
    if let Ok(existing) = txn.execute(StoreRequest::GetShardById { id: shard_id }).await {
        if let Some(StoreRow::Shard(mut row)) = existing.rows.into_iter().next() {
            if row.version > 0 {
                row.version -= 1;
            }
            txn.execute(StoreRequest::UpdateShard(row)).await.ok();
        }
    }
    txn.commit().await.ok();
}

pub fn range_to_row(range: &ShardRange) -> Result<ShardRangeRow> {
    Ok(ShardRangeRow {
        low_raw: range.low().to_raw_bytes()?,
        high_raw: if range.high().is_max() {
            None
        } else {
            Some(range.high().to_raw_bytes()?)
        },
    })
}

pub fn row_to_range(row: &ShardRangeRow, key_type: KeyType) -> Result<ShardRange> {
    let low = Key::from_raw_bytes(key_type, &row.low_raw)?;
    let high = match &row.high_raw {
        Some(bytes) => Key::from_raw_bytes(key_type, bytes)?,
        None => Key::max_value(key_type),
    };
    Ok(ShardRange::new(low, high)?)
}

pub fn mapping_status_to_store(status: CacheMappingStatus) -> MappingStatus {
    match status {
        CacheMappingStatus::Offline => MappingStatus::Offline,
        CacheMappingStatus::Online => MappingStatus::Online,
    }
}

pub fn mapping_status_from_store(status: MappingStatus) -> CacheMappingStatus {
    match status {
        MappingStatus::Offline => CacheMappingStatus::Offline,
        MappingStatus::Online => CacheMappingStatus::Online,
    }
}

pub fn shard_map_kind_from_store(kind: ShardMapKind) -> CacheShardMapKind {
    match kind {
        ShardMapKind::List => CacheShardMapKind::List,
        ShardMapKind::Range => CacheShardMapKind::Range,
    }
}

pub fn row_to_snapshot(row: &MappingRow, key_type: KeyType) -> Result<MappingSnapshot> {
    Ok(MappingSnapshot {
        id: row.id,
        shard_map_id: row.shard_map_id,
        shard_id: row.shard_id,
        range: row_to_range(&row.range, key_type)?,
        status: mapping_status_from_store(row.status),
        lock_owner_id: row.lock_owner_id,
    })
}

pub fn snapshot_to_row(snapshot: &MappingSnapshot) -> Result<MappingRow> {
    Ok(MappingRow {
        id: snapshot.id,
        shard_map_id: snapshot.shard_map_id,
        shard_id: snapshot.shard_id,
        range: range_to_row(&snapshot.range)?,
        status: mapping_status_to_store(snapshot.status),
        lock_owner_id: snapshot.lock_owner_id,
    })
}
