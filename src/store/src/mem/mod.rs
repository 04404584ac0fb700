//! An in-memory reference implementation of [`GlobalStore`]/[`LocalStore`],
//! always compiled in (no feature flag), analogous to the teacher shipping
//! an in-memory object store alongside its cloud backends. Used by tests and
//! by any caller that hasn't wired a real backend.
//!
//! Serializability is provided the blunt way: each transaction holds the
//! catalog's `tokio::sync::Mutex` for its entire lifetime, so only one
//! transaction can be in flight against a given catalog at a time. That is
//! coarse, but it is exactly what spec.md §8's overlap/version-collision
//! invariants need to hold in tests.

mod data;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use self::data::CatalogData;
use crate::{
    request::{StoreRequest, StoreResult},
    GlobalStore, LocalStore, LocalStoreFactory, Result, ShardLocation, StoreTransaction,
};

struct MemTransaction {
    guard: OwnedMutexGuard<CatalogData>,
    staged: CatalogData,
}

#[async_trait]
impl StoreTransaction for MemTransaction {
    async fn execute(&mut self, request: StoreRequest) -> Result<StoreResult> {
        self.staged.apply(request)
    }

    async fn commit(mut self: Box<Self>) -> Result<StoreResult> {
        *self.guard = self.staged;
        Ok(StoreResult::ok(vec![]))
    }

    async fn rollback(self: Box<Self>) {
        // `staged` is simply dropped; `guard` (and the real catalog behind
        // it) was never touched.
    }
}

/// The single logical catalog shared by all clients.
pub struct MemGlobalStore {
    data: Arc<Mutex<CatalogData>>,
}

impl MemGlobalStore {
    pub fn new() -> Self {
        MemGlobalStore {
            data: Arc::new(Mutex::new(CatalogData::default())),
        }
    }
}

impl Default for MemGlobalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GlobalStore for MemGlobalStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.data.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemTransaction { guard, staged }))
    }
}

/// A per-shard mirror of the mappings referencing that shard.
pub struct MemLocalStore {
    location: ShardLocation,
    data: Arc<Mutex<CatalogData>>,
}

impl MemLocalStore {
    pub fn new(location: ShardLocation) -> Self {
        MemLocalStore {
            location,
            data: Arc::new(Mutex::new(CatalogData::default())),
        }
    }
}

#[async_trait]
impl LocalStore for MemLocalStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.data.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemTransaction { guard, staged }))
    }

    fn location(&self) -> &ShardLocation {
        &self.location
    }
}

/// Hands out one [`MemLocalStore`] per distinct [`ShardLocation`], creating
/// it lazily on first use and remembering it afterwards so repeated lookups
/// see the same data.
#[derive(Default)]
pub struct MemLocalStoreFactory {
    stores: std::sync::Mutex<HashMap<(String, String), Arc<dyn LocalStore>>>,
}

impl MemLocalStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(location: &ShardLocation) -> (String, String) {
        (
            location.server.to_ascii_lowercase(),
            location.database.to_ascii_lowercase(),
        )
    }
}

#[async_trait]
impl LocalStoreFactory for MemLocalStoreFactory {
    async fn local_store(&self, location: &ShardLocation) -> Result<Arc<dyn LocalStore>> {
        let key = Self::key(location);
        let mut stores = self.stores.lock().expect("local store registry poisoned");
        let store = stores
            .entry(key)
            .or_insert_with(|| Arc::new(MemLocalStore::new(location.clone())) as Arc<dyn LocalStore>);
        Ok(store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{request::StoreRequest, model::ShardMapRow, ShardMapKind};
    use key_algebra::KeyType;

    fn shard_map_row(name: &str) -> ShardMapRow {
        ShardMapRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind: ShardMapKind::List,
            key_type: KeyType::Int32,
        }
    }

    #[tokio::test]
    async fn add_shard_map_then_duplicate_name_conflicts() {
        let store = MemGlobalStore::new();
        let mut tx = store.begin().await.unwrap();
        let row = shard_map_row("Customers");
        let result = tx.execute(StoreRequest::AddShardMap(row.clone())).await.unwrap();
        assert!(result.success);
        tx.commit().await.unwrap();

        let mut tx2 = store.begin().await.unwrap();
        let mut dup = shard_map_row("customers");
        dup.id = Uuid::new_v4();
        let result = tx2.execute(StoreRequest::AddShardMap(dup)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.code, crate::ResultCode::ShardMapExists);
    }

    #[tokio::test]
    async fn rollback_discards_staged_changes() {
        let store = MemGlobalStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.execute(StoreRequest::AddShardMap(shard_map_row("Orders")))
            .await
            .unwrap();
        tx.rollback().await;

        let mut tx2 = store.begin().await.unwrap();
        let result = tx2
            .execute(StoreRequest::GetShardMapByName {
                name: "Orders".to_string(),
            })
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn concurrent_transactions_serialize() {
        let store = Arc::new(MemGlobalStore::new());
        let s1 = store.clone();
        let s2 = store.clone();
        let h1 = tokio::spawn(async move {
            let mut tx = s1.begin().await.unwrap();
            tx.execute(StoreRequest::AddShardMap(shard_map_row("A")))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.commit().await.unwrap();
        });
        let h2 = tokio::spawn(async move {
            let mut tx = s2.begin().await.unwrap();
            tx.execute(StoreRequest::AddShardMap(shard_map_row("B")))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx.execute(StoreRequest::ListShardMaps).await.unwrap();
        assert_eq!(result.rows.len(), 2);
    }
}
