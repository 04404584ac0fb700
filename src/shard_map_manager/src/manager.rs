use std::sync::Arc;

use cache::ShardMapMeta;
use key_algebra::KeyType;
use operations::ops::{AddShardMapOp, RemoveShardMapOp, UpgradeStoreOp};
use operations::{support, OpContext, OperationEngine};
use recovery::RecoveryManager;
use store::{ShardMapKind, StoreRequest, StoreRow};
use uuid::Uuid;

use crate::config::ShardMapManagerConfig;
use crate::error::{ShardMapNotFoundSnafu, ShardMapManagerClosedSnafu};
use crate::shard_map::{ListShardMap, RangeShardMap, ShardMap, ShardMapCore};
use crate::Result;

/// What `ShardMapManager::open` does before returning, beyond connecting to
/// the configured stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Drive `RecoveryManager::recover_pending` before returning, per
    /// spec.md §4.H's "the caller opts in to replaying the pending-operation
    /// log on open."
    pub recover_pending: bool,
}

/// Shared manager state. `ShardMapManager` and every `ShardMapRef` it has
/// handed out hold a reference to this; `ShardMapRef`s hold only a `Weak`
/// one, so a dropped manager is observed as `Error::ShardMapManagerClosed`
/// on the next call rather than silently operating on a dead store.
pub(crate) struct ManagerInner {
    pub(crate) ctx: OpContext,
    pub(crate) engine: OperationEngine,
    pub(crate) recovery: RecoveryManager,
}

/// The facade applications depend on (spec.md §4.E/§4.H): a programmatic,
/// no-CLI library surface over the global catalog, its shards, and the
/// mapping cache.
pub struct ShardMapManager {
    inner: Arc<ManagerInner>,
}

impl ShardMapManager {
    fn from_config(config: ShardMapManagerConfig) -> Self {
        let ctx = OpContext {
            global_store: config.global_store,
            local_store_factory: config.local_store_factory,
            cache: config.cache_store,
            retry_policy: config.retry_policy,
            log: config.log,
        };
        let engine = OperationEngine::new(ctx.clone());
        let recovery = RecoveryManager::new(ctx.clone());
        ShardMapManager {
            inner: Arc::new(ManagerInner { ctx, engine, recovery }),
        }
    }

    /// Brings a fresh catalog up to the schema version this binary expects,
    /// then returns a manager over it. Idempotent: running `create` again
    /// against an already-current catalog is a harmless no-op (see
    /// [`UpgradeStoreOp`]).
    pub async fn create(config: ShardMapManagerConfig) -> Result<Self> {
        let manager = Self::from_config(config);
        manager.inner.engine.execute(UpgradeStoreOp::new(), None).await?;
        Ok(manager)
    }

    /// Opens an existing catalog, optionally replaying any pending-log rows
    /// left behind by a process that died mid-operation (spec.md §4.H).
    pub async fn open(config: ShardMapManagerConfig, options: OpenOptions) -> Result<Self> {
        let manager = Self::from_config(config);
        if options.recover_pending {
            manager.inner.recovery.recover_pending().await?;
        }
        Ok(manager)
    }

    pub async fn list_shard_maps(&self) -> Result<Vec<ShardMapMeta>> {
        let mut txn = self.inner.ctx.global_store.begin().await?;
        let result = txn.execute(StoreRequest::ListShardMaps).await?;
        txn.commit().await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| match row {
                StoreRow::ShardMap(row) => Some(ShardMapMeta {
                    id: row.id,
                    name: row.name,
                    kind: support::shard_map_kind_from_store(row.kind),
                    key_type: row.key_type,
                }),
                _ => None,
            })
            .collect())
    }

    pub async fn get_shard_map(&self, name: &str) -> Result<ShardMap> {
        let mut txn = self.inner.ctx.global_store.begin().await?;
        let result = txn.execute(StoreRequest::GetShardMapByName { name: name.to_string() }).await?;
        txn.commit().await?;
        let row = result
            .rows
            .into_iter()
            .find_map(|row| match row {
                StoreRow::ShardMap(row) => Some(row),
                _ => None,
            })
            .ok_or_else(|| ShardMapNotFoundSnafu { name: name.to_string() }.build())?;
        Ok(self.wrap(row.id, row.name, row.kind, row.key_type))
    }

    pub async fn create_list_shard_map(&self, name: impl Into<String>, key_type: KeyType) -> Result<ShardMap> {
        self.create_shard_map(name, ShardMapKind::List, key_type).await
    }

    pub async fn create_range_shard_map(&self, name: impl Into<String>, key_type: KeyType) -> Result<ShardMap> {
        self.create_shard_map(name, ShardMapKind::Range, key_type).await
    }

    async fn create_shard_map(&self, name: impl Into<String>, kind: ShardMapKind, key_type: KeyType) -> Result<ShardMap> {
        let name = name.into();
        let op = AddShardMapOp::new(name.clone(), kind, key_type);
        let shard_map_id = op.shard_map_id;
        self.inner.engine.execute(op, None).await?;
        Ok(self.wrap(shard_map_id, name, kind, key_type))
    }

    pub async fn delete_shard_map(&self, name: &str) -> Result<()> {
        let mut txn = self.inner.ctx.global_store.begin().await?;
        let result = txn.execute(StoreRequest::GetShardMapByName { name: name.to_string() }).await?;
        txn.commit().await?;
        let row = result
            .rows
            .into_iter()
            .find_map(|row| match row {
                StoreRow::ShardMap(row) => Some(row),
                _ => None,
            })
            .ok_or_else(|| ShardMapNotFoundSnafu { name: name.to_string() }.build())?;
        let op = RemoveShardMapOp::new(row.id, row.name, row.kind, row.key_type);
        self.inner.engine.execute(op, None).await?;
        Ok(())
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.inner.recovery
    }

    fn wrap(&self, shard_map_id: Uuid, name: String, kind: ShardMapKind, key_type: KeyType) -> ShardMap {
        let core = ShardMapCore {
            manager: Arc::downgrade(&self.inner),
            shard_map_id,
            name,
            key_type,
        };
        match kind {
            ShardMapKind::List => ShardMap::List(ListShardMap(core)),
            ShardMapKind::Range => ShardMap::Range(RangeShardMap(core)),
        }
    }
}

pub(crate) fn upgrade(manager: &std::sync::Weak<ManagerInner>) -> Result<Arc<ManagerInner>> {
    manager.upgrade().ok_or_else(|| ShardMapManagerClosedSnafu.build())
}
