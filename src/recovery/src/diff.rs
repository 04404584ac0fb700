use std::collections::HashMap;

use key_algebra::{Key, KeyType, ShardRange};
use operations::support;
use store::{GlobalStore, LocalStore, MappingRow, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::model::{DiffRange, DiffState};
use crate::Result;

/// Reads every mapping the shard's local catalog thinks it owns.
async fn read_local(local: &dyn LocalStore, shard_id: Uuid) -> Result<Vec<MappingRow>> {
    let mut txn = local.begin().await?;
    let result = txn.execute(StoreRequest::GetMappingsByShard { shard_id }).await?;
    txn.commit().await?;
    Ok(result
        .rows
        .into_iter()
        .filter_map(|row| match row {
            StoreRow::Mapping(m) => Some(m),
            _ => None,
        })
        .collect())
}

/// Reads the "relevant" global subset for this shard (spec.md §4.F.Detect):
/// every mapping the global catalog assigns to the shard, plus every global
/// mapping whose range intersects one of the shard's local ranges (even if
/// assigned to a different shard -- that overlap is exactly what a
/// `Conflicting` classification needs to see).
async fn read_relevant_global(
    global_store: &dyn GlobalStore,
    shard_id: Uuid,
    shard_map_id: Uuid,
    local: &[MappingRow],
) -> Result<Vec<MappingRow>> {
    let mut by_id = HashMap::new();
    let mut txn = global_store.begin().await?;

    let assigned = txn.execute(StoreRequest::GetMappingsByShard { shard_id }).await?;
    for row in assigned.rows {
        if let StoreRow::Mapping(m) = row {
            by_id.insert(m.id, m);
        }
    }

    for local_row in local {
        let overlapping = txn
            .execute(StoreRequest::GetMappingsByRange {
                shard_map_id,
                low_raw: local_row.range.low_raw.clone(),
                high_raw: local_row.range.high_raw.clone(),
            })
            .await?;
        for row in overlapping.rows {
            if let StoreRow::Mapping(m) = row {
                by_id.insert(m.id, m);
            }
        }
    }

    txn.commit().await?;
    Ok(by_id.into_values().collect())
}

/// Every distinct low/high bound across both sides, sorted ascending, so the
/// gaps between consecutive boundaries are maximal constant sub-ranges
/// (spec.md §4.F.Detect: "partition the combined key space into maximal
/// constant sub-ranges using `ShardRange` ordering").
fn boundaries(local: &[MappingRow], global: &[MappingRow], key_type: KeyType) -> Result<Vec<Key>> {
    let mut bounds = Vec::new();
    for row in local.iter().chain(global.iter()) {
        bounds.push(Key::from_raw_bytes(key_type, &row.range.low_raw)?);
        bounds.push(match &row.range.high_raw {
            Some(bytes) => Key::from_raw_bytes(key_type, bytes)?,
            None => Key::max_value(key_type),
        });
    }
    bounds.sort();
    bounds.dedup();
    Ok(bounds)
}

fn covering<'a>(rows: &'a [MappingRow], at: &Key, key_type: KeyType) -> Result<Option<&'a MappingRow>> {
    for row in rows {
        if support::row_to_range(&row.range, key_type)?.contains(at) {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

/// Runs the detect algorithm for one shard and returns every sub-range the
/// two catalogs disagree on. Concordant sub-ranges (same mapping id on both
/// sides) and sub-ranges neither side claims are omitted entirely.
pub async fn detect(
    global_store: &dyn GlobalStore,
    local_store: &dyn LocalStore,
    shard_map_id: Uuid,
    shard_id: Uuid,
    key_type: KeyType,
) -> Result<Vec<DiffRange>> {
    let local = read_local(local_store, shard_id).await?;
    let global = read_relevant_global(global_store, shard_id, shard_map_id, &local).await?;
    let bounds = boundaries(&local, &global, key_type)?;

    let mut out = Vec::new();
    for pair in bounds.windows(2) {
        let (low, high) = (&pair[0], &pair[1]);
        let elem = ShardRange::new(low.clone(), high.clone())?;
        let local_row = covering(&local, low, key_type)?;
        let global_row = covering(&global, low, key_type)?;

        let state = match (local_row, global_row) {
            (None, None) => continue,
            (None, Some(g)) => DiffState::ShardMapOnly(support::row_to_snapshot(g, key_type)?),
            (Some(l), None) => DiffState::ShardOnly(support::row_to_snapshot(l, key_type)?),
            (Some(l), Some(g)) => {
                if l.id == g.id {
                    continue;
                }
                DiffState::Conflicting {
                    shard_map_mapping: support::row_to_snapshot(g, key_type)?,
                    shard_mapping: support::row_to_snapshot(l, key_type)?,
                }
            }
        };
        out.push(DiffRange { range: elem, state });
    }
    Ok(out)
}
