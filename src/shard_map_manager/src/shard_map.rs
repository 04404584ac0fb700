use std::sync::Weak;

use cache::{MappingSnapshot, MappingStatus, TtlPolicy};
use key_algebra::{Key, KeyType};
use operations::ops::{
    AddMappingOp, AddShardOp, LockMappingOp, MergeMappingsOp, RemoveMappingOp, RemoveShardOp,
    SplitMappingOp, UnlockMappingOp, UpdateMappingOp, UpdateShardOp,
};
use operations::support;
use store::{ShardLocation, ShardRangeRow, ShardStatus, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::error::{MappingIsOfflineSnafu, MappingNotFoundForKeySnafu};
use crate::manager::{upgrade, ManagerInner};
use crate::Result;

/// The shared state behind both [`ListShardMap`] and [`RangeShardMap`]:
/// which shard map this handle names, and a weak link back to the manager
/// it was issued by (spec.md §4.H, "closure invalidates derived handles").
pub(crate) struct ShardMapCore {
    pub(crate) manager: Weak<ManagerInner>,
    pub(crate) shard_map_id: Uuid,
    pub(crate) name: String,
    pub(crate) key_type: KeyType,
}

impl ShardMapCore {
    pub fn shard_map_id(&self) -> Uuid {
        self.shard_map_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// `None` on a true miss; never an error, unlike [`Self::lookup`]
    /// (spec.md §4.E: "`TryLookup` reports absence as `None`, `Lookup`
    /// raises `MappingNotFoundForKey`").
    pub async fn try_lookup(&self, key: &Key) -> Result<Option<MappingSnapshot>> {
        let inner = upgrade(&self.manager)?;
        if let Some(entry) = inner.ctx.cache.lookup(self.shard_map_id, key)? {
            inner.ctx.cache.record_hit(self.shard_map_id, key)?;
            return Ok(Some(entry.mapping));
        }

        let low_raw = key.to_raw_bytes()?;
        let mut txn = inner.ctx.global_store.begin().await?;
        let result = txn
            .execute(StoreRequest::GetMappingsByRange {
                shard_map_id: self.shard_map_id,
                low_raw,
                high_raw: None,
            })
            .await?;
        txn.commit().await?;

        for row in result.rows {
            if let StoreRow::Mapping(row) = row {
                let range = support::row_to_range(&row.range, self.key_type)?;
                if range.contains(key) {
                    let snapshot = support::row_to_snapshot(&row, self.key_type)?;
                    inner
                        .ctx
                        .cache
                        .add_or_update(self.shard_map_id, snapshot.clone(), TtlPolicy::ResetTtl)?;
                    return Ok(Some(snapshot));
                }
            }
        }
        Ok(None)
    }

    /// Unlike [`Self::try_lookup`], raises rather than silently returning a
    /// mapping that is present but offline (spec.md §4.E: "`Lookup` raises
    /// ... when the mapping exists but is offline").
    pub async fn lookup(&self, key: &Key) -> Result<MappingSnapshot> {
        let snapshot = self.try_lookup(key).await?.ok_or_else(|| {
            MappingNotFoundForKeySnafu {
                what: format!("no mapping in shard map {} covers the requested key", self.name),
            }
            .build()
        })?;
        if snapshot.status != MappingStatus::Online {
            return MappingIsOfflineSnafu {
                what: format!("mapping {} in shard map {} is offline", snapshot.id, self.name),
            }
            .fail();
        }
        Ok(snapshot)
    }

    pub async fn add(&self, shard_id: Uuid, low_raw: Vec<u8>, high_raw: Option<Vec<u8>>, is_point: bool) -> Result<MappingSnapshot> {
        let inner = upgrade(&self.manager)?;
        let op = AddMappingOp::new(self.shard_map_id, shard_id, self.key_type, low_raw.clone(), high_raw.clone(), is_point);
        let mapping_id = op.mapping_id;
        inner.engine.execute(op, None).await?;
        support::row_to_snapshot(
            &store::MappingRow {
                id: mapping_id,
                shard_map_id: self.shard_map_id,
                shard_id,
                range: ShardRangeRow { low_raw, high_raw },
                status: store::MappingStatus::Online,
                lock_owner_id: Uuid::nil(),
            },
            self.key_type,
        )
        .map_err(Into::into)
    }

    pub async fn remove(&self, mapping_id: Uuid, caller_lock_owner_id: Uuid, is_point: bool) -> Result<()> {
        let inner = upgrade(&self.manager)?;
        let mut txn = inner.ctx.global_store.begin().await?;
        let existing = txn.execute(StoreRequest::GetMappingById { id: mapping_id }).await?;
        txn.commit().await?;
        let shard_id = existing
            .rows
            .into_iter()
            .find_map(|row| match row {
                StoreRow::Mapping(row) => Some(row.shard_id),
                _ => None,
            })
            .ok_or_else(|| {
                MappingNotFoundForKeySnafu {
                    what: format!("mapping {mapping_id} does not exist"),
                }
                .build()
            })?;
        let op = RemoveMappingOp::new(self.shard_map_id, shard_id, mapping_id, caller_lock_owner_id, is_point);
        inner.engine.execute(op, None).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        mapping_id: Uuid,
        old_shard_id: Uuid,
        new_shard_id: Uuid,
        low_raw: Vec<u8>,
        high_raw: Option<Vec<u8>>,
        status: MappingStatus,
        lock_owner_id: Uuid,
        caller_lock_owner_id: Uuid,
        is_point: bool,
    ) -> Result<MappingSnapshot> {
        let inner = upgrade(&self.manager)?;
        let op = UpdateMappingOp {
            operation_id: Uuid::new_v4(),
            mapping_id,
            shard_map_id: self.shard_map_id,
            old_shard_id,
            new_shard_id,
            key_type: self.key_type,
            low_raw: low_raw.clone(),
            high_raw: high_raw.clone(),
            status: support::mapping_status_to_store(status),
            lock_owner_id,
            caller_lock_owner_id,
            is_point,
            previous_row: None,
        };
        inner.engine.execute(op, None).await?;
        support::row_to_snapshot(
            &store::MappingRow {
                id: mapping_id,
                shard_map_id: self.shard_map_id,
                shard_id: new_shard_id,
                range: ShardRangeRow { low_raw, high_raw },
                status: support::mapping_status_to_store(status),
                lock_owner_id,
            },
            self.key_type,
        )
        .map_err(Into::into)
    }

    /// Not part of spec.md §4.E's listed surface (which names only
    /// `try_lookup`/`lookup`/`add`/`remove`/`update`/`split`/`merge`), but
    /// needed to drive `Update`'s lock check from outside this crate, so
    /// it's exposed here rather than forcing callers to reach into
    /// `operations` directly.
    pub async fn lock(&self, mapping_id: Uuid, lock_owner_id: Uuid) -> Result<()> {
        let inner = upgrade(&self.manager)?;
        inner.engine.execute(LockMappingOp::new(mapping_id, lock_owner_id), None).await?;
        Ok(())
    }

    pub async fn unlock(&self, mapping_id: Uuid, caller_lock_owner_id: Uuid) -> Result<()> {
        let inner = upgrade(&self.manager)?;
        inner.engine.execute(UnlockMappingOp::new(mapping_id, caller_lock_owner_id), None).await?;
        Ok(())
    }

    pub async fn add_shard(&self, location: ShardLocation) -> Result<Uuid> {
        let inner = upgrade(&self.manager)?;
        let op = AddShardOp::new(self.shard_map_id, location);
        let shard_id = op.shard_id;
        inner.engine.execute(op, None).await?;
        Ok(shard_id)
    }

    pub async fn update_shard(&self, shard_id: Uuid, location: ShardLocation, status: ShardStatus, expected_version: u64) -> Result<()> {
        let inner = upgrade(&self.manager)?;
        let op = UpdateShardOp {
            operation_id: Uuid::new_v4(),
            shard_id,
            shard_map_id: self.shard_map_id,
            location,
            status,
            expected_version,
            previous_row: None,
        };
        inner.engine.execute(op, None).await?;
        Ok(())
    }

    pub async fn remove_shard(&self, shard_id: Uuid) -> Result<()> {
        let inner = upgrade(&self.manager)?;
        inner.engine.execute(RemoveShardOp::new(shard_id), None).await?;
        Ok(())
    }

    pub async fn split(&self, shard_id: Uuid, mapping_id: Uuid, at_raw: Vec<u8>) -> Result<(Uuid, Uuid)> {
        let inner = upgrade(&self.manager)?;
        let op = SplitMappingOp::new(self.shard_map_id, shard_id, mapping_id, self.key_type, at_raw);
        let (left_id, right_id) = (op.left_id, op.right_id);
        inner.engine.execute(op, None).await?;
        Ok((left_id, right_id))
    }

    pub async fn merge(&self, shard_id: Uuid, left_id: Uuid, right_id: Uuid) -> Result<Uuid> {
        let inner = upgrade(&self.manager)?;
        let op = MergeMappingsOp::new(self.shard_map_id, shard_id, left_id, right_id);
        let merged_id = op.merged_id;
        inner.engine.execute(op, None).await?;
        Ok(merged_id)
    }
}

/// A shard map whose mappings are single points, each naming one discrete
/// key (spec.md §4.E). No `split`/`merge`: those are range-only operations.
pub struct ListShardMap(pub(crate) ShardMapCore);

/// A shard map whose mappings are contiguous key ranges, supporting
/// `split`/`merge` in addition to the common surface.
pub struct RangeShardMap(pub(crate) ShardMapCore);

impl std::ops::Deref for ListShardMap {
    type Target = ShardMapCore;
    fn deref(&self) -> &ShardMapCore {
        &self.0
    }
}

impl std::ops::Deref for RangeShardMap {
    type Target = ShardMapCore;
    fn deref(&self) -> &ShardMapCore {
        &self.0
    }
}

impl RangeShardMap {
    pub async fn split(&self, shard_id: Uuid, mapping_id: Uuid, at_raw: Vec<u8>) -> Result<(Uuid, Uuid)> {
        self.0.split(shard_id, mapping_id, at_raw).await
    }

    pub async fn merge(&self, shard_id: Uuid, left_id: Uuid, right_id: Uuid) -> Result<Uuid> {
        self.0.merge(shard_id, left_id, right_id).await
    }
}

/// One shard map, either kind. Returned by `ShardMapManager::{get_shard_map,
/// create_list_shard_map, create_range_shard_map}` (spec.md §4.E). Holds
/// only a weak reference back to the manager, so using a handle after the
/// manager that issued it has been dropped surfaces as
/// `Error::ShardMapManagerClosed` rather than panicking or operating on a
/// dead store.
///
/// `OpenConnection` (spec.md §4.E) is intentionally not implemented here:
/// it is defined only in terms of `Lookup` plus an external connection
/// collaborator (a SQL client, a driver pool) that has no counterpart in
/// this workspace.
pub enum ShardMap {
    List(ListShardMap),
    Range(RangeShardMap),
}

/// A handle to one shard map, returned by `ShardMapManager::get_shard_map`
/// and the `create_*_shard_map` constructors.
pub type ShardMapRef = ShardMap;

impl ShardMap {
    fn core(&self) -> &ShardMapCore {
        match self {
            ShardMap::List(m) => &m.0,
            ShardMap::Range(m) => &m.0,
        }
    }

    pub fn shard_map_id(&self) -> Uuid {
        self.core().shard_map_id()
    }

    pub fn name(&self) -> &str {
        self.core().name()
    }

    pub fn key_type(&self) -> KeyType {
        self.core().key_type()
    }

    pub async fn try_lookup(&self, key: &Key) -> Result<Option<MappingSnapshot>> {
        self.core().try_lookup(key).await
    }

    pub async fn lookup(&self, key: &Key) -> Result<MappingSnapshot> {
        self.core().lookup(key).await
    }

    pub async fn add(&self, shard_id: Uuid, low_raw: Vec<u8>, high_raw: Option<Vec<u8>>, is_point: bool) -> Result<MappingSnapshot> {
        self.core().add(shard_id, low_raw, high_raw, is_point).await
    }

    pub async fn remove(&self, mapping_id: Uuid, caller_lock_owner_id: Uuid, is_point: bool) -> Result<()> {
        self.core().remove(mapping_id, caller_lock_owner_id, is_point).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        mapping_id: Uuid,
        old_shard_id: Uuid,
        new_shard_id: Uuid,
        low_raw: Vec<u8>,
        high_raw: Option<Vec<u8>>,
        status: MappingStatus,
        lock_owner_id: Uuid,
        caller_lock_owner_id: Uuid,
        is_point: bool,
    ) -> Result<MappingSnapshot> {
        self.core()
            .update(
                mapping_id,
                old_shard_id,
                new_shard_id,
                low_raw,
                high_raw,
                status,
                lock_owner_id,
                caller_lock_owner_id,
                is_point,
            )
            .await
    }

    pub async fn add_shard(&self, location: ShardLocation) -> Result<Uuid> {
        self.core().add_shard(location).await
    }

    pub async fn update_shard(&self, shard_id: Uuid, location: ShardLocation, status: ShardStatus, expected_version: u64) -> Result<()> {
        self.core().update_shard(shard_id, location, status, expected_version).await
    }

    pub async fn remove_shard(&self, shard_id: Uuid) -> Result<()> {
        self.core().remove_shard(shard_id).await
    }

    pub async fn lock(&self, mapping_id: Uuid, lock_owner_id: Uuid) -> Result<()> {
        self.core().lock(mapping_id, lock_owner_id).await
    }

    pub async fn unlock(&self, mapping_id: Uuid, caller_lock_owner_id: Uuid) -> Result<()> {
        self.core().unlock(mapping_id, caller_lock_owner_id).await
    }
}
