//! The mapping cache (spec.md §4.D): an in-memory lookup with per-entry TTL
//! that doubles on hit and resets on refresh/invalidation.
//!
//! Two indices, both behind a reader-writer lock (many concurrent lookups,
//! exclusive mutation during write-through, per spec.md §5): name -> shard
//! map, and, per shard map id, an ordered index keyed by the raw-byte lower
//! bound of each mapping's range.

mod entry;
mod error;
mod model;
mod stats;

use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use key_algebra::Key;
use snafu::ResultExt;
use uuid::Uuid;

pub use entry::{CacheEntry, TtlPolicy, MAX_TTL_MS};
pub use error::{Error, Result};
pub use model::{MappingSnapshot, MappingStatus, ShardMapKind, ShardMapMeta};
pub use stats::CacheStats;

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[derive(Default)]
struct MappingIndex {
    by_low: BTreeMap<Vec<u8>, CacheEntry>,
}

#[derive(Default)]
pub struct MappingCache {
    shard_maps: RwLock<HashMap<String, ShardMapMeta>>,
    mappings: RwLock<HashMap<Uuid, MappingIndex>>,
    stats: CacheStats,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // -- name -> shard map -------------------------------------------------

    pub fn add_shard_map(&self, meta: ShardMapMeta) {
        let mut guard = self.shard_maps.write().expect("cache lock poisoned");
        guard.insert(normalize_name(&meta.name), meta);
    }

    pub fn remove_shard_map(&self, name: &str) {
        let mut guard = self.shard_maps.write().expect("cache lock poisoned");
        guard.remove(&normalize_name(name));
    }

    pub fn lookup_shard_map(&self, name: &str) -> Option<ShardMapMeta> {
        let guard = self.shard_maps.read().expect("cache lock poisoned");
        guard.get(&normalize_name(name)).cloned()
    }

    // -- (shard map, key) -> mapping ----------------------------------------

    /// Fast-path lookup: returns `None` for both a true miss and an expired
    /// entry, and never mutates the index (expiry is checked, not enforced,
    /// here -- eviction only happens on write-through or explicit
    /// [`Self::remove`], per spec.md §4.D).
    pub fn lookup(&self, shard_map_id: Uuid, key: &Key) -> Result<Option<CacheEntry>> {
        let key_bytes = key.to_raw_bytes().context(error::KeyEncodingSnafu)?;
        let guard = self.mappings.read().expect("cache lock poisoned");
        let found = guard
            .get(&shard_map_id)
            .and_then(|idx| idx.by_low.range(..=key_bytes).next_back())
            .map(|(_, entry)| entry.clone())
            .filter(|entry| entry.mapping.range.contains(key) && !entry.is_expired());

        if found.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        Ok(found)
    }

    /// Doubles the TTL of an entry the caller has just confirmed was a hit.
    /// Kept as a separate step from [`Self::lookup`] so the doubling only
    /// ever happens on a path the caller has verified was a hit.
    pub fn record_hit(&self, shard_map_id: Uuid, key: &Key) -> Result<()> {
        let key_bytes = key.to_raw_bytes().context(error::KeyEncodingSnafu)?;
        let mut guard = self.mappings.write().expect("cache lock poisoned");
        if let Some(idx) = guard.get_mut(&shard_map_id) {
            if let Some((_, entry)) = idx.by_low.range_mut(..=key_bytes).next_back() {
                if entry.mapping.range.contains(key) && !entry.is_expired() {
                    entry.double_ttl();
                }
            }
        }
        Ok(())
    }

    /// Write-through insert/update. `policy` controls whether an existing
    /// entry's TTL is reset or preserved; a brand-new entry always starts at
    /// TTL zero regardless of policy.
    pub fn add_or_update(&self, shard_map_id: Uuid, mapping: MappingSnapshot, policy: TtlPolicy) -> Result<()> {
        let low_bytes = mapping
            .range
            .low()
            .to_raw_bytes()
            .context(error::KeyEncodingSnafu)?;
        let mut guard = self.mappings.write().expect("cache lock poisoned");
        let idx = guard.entry(shard_map_id).or_default();
        match idx.by_low.get_mut(&low_bytes) {
            Some(existing) if policy == TtlPolicy::PreserveTtl => {
                let ttl = existing.ttl_ms;
                *existing = CacheEntry::fresh(mapping);
                existing.ttl_ms = ttl;
            }
            _ => {
                idx.by_low.insert(low_bytes, CacheEntry::fresh(mapping));
            }
        }
        Ok(())
    }

    /// Drops the entry entirely.
    pub fn remove(&self, shard_map_id: Uuid, key: &Key) -> Result<()> {
        let key_bytes = key.to_raw_bytes().context(error::KeyEncodingSnafu)?;
        let mut guard = self.mappings.write().expect("cache lock poisoned");
        if let Some(idx) = guard.get_mut(&shard_map_id) {
            let to_remove = idx
                .by_low
                .range(..=key_bytes.clone())
                .next_back()
                .filter(|(_, entry)| entry.mapping.range.contains(key))
                .map(|(low, _)| low.clone());
            if let Some(low) = to_remove {
                idx.by_low.remove(&low);
                self.stats.record_eviction();
            }
        }
        Ok(())
    }

    /// Resets the entry's TTL to zero without removing it, per spec.md §4.D
    /// "on a global refresh or explicit invalidation TTL resets to 0" --
    /// distinct from [`Self::remove`].
    pub fn invalidate(&self, shard_map_id: Uuid, key: &Key) -> Result<()> {
        let key_bytes = key.to_raw_bytes().context(error::KeyEncodingSnafu)?;
        let mut guard = self.mappings.write().expect("cache lock poisoned");
        if let Some(idx) = guard.get_mut(&shard_map_id) {
            if let Some((_, entry)) = idx.by_low.range_mut(..=key_bytes).next_back() {
                if entry.mapping.range.contains(key) {
                    entry.reset_ttl();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use key_algebra::{KeyType, KeyValue, ShardRange};

    use super::*;

    fn snapshot(low: i32, high: i32) -> MappingSnapshot {
        let low = Key::Value(KeyType::Int32, KeyValue::Int32(low));
        let high = Key::Value(KeyType::Int32, KeyValue::Int32(high));
        MappingSnapshot {
            id: Uuid::new_v4(),
            shard_map_id: Uuid::nil(),
            shard_id: Uuid::new_v4(),
            range: ShardRange::new(low, high).unwrap(),
            status: MappingStatus::Online,
            lock_owner_id: Uuid::nil(),
        }
    }

    fn k(v: i32) -> Key {
        Key::Value(KeyType::Int32, KeyValue::Int32(v))
    }

    #[test]
    fn ttl_doubles_on_hit_and_caps() {
        let cache = MappingCache::new();
        let map_id = Uuid::new_v4();
        cache
            .add_or_update(map_id, snapshot(0, 100), TtlPolicy::ResetTtl)
            .unwrap();
        let entry = cache.lookup(map_id, &k(5)).unwrap().unwrap();
        assert_eq!(entry.ttl_ms, 0);
        for _ in 0..40 {
            cache.record_hit(map_id, &k(5)).unwrap();
        }
        let entry = cache.lookup(map_id, &k(5)).unwrap().unwrap();
        assert_eq!(entry.ttl_ms, MAX_TTL_MS);
    }

    #[test]
    fn invalidate_resets_without_removing() {
        let cache = MappingCache::new();
        let map_id = Uuid::new_v4();
        cache
            .add_or_update(map_id, snapshot(0, 100), TtlPolicy::ResetTtl)
            .unwrap();
        cache.record_hit(map_id, &k(5)).unwrap();
        cache.invalidate(map_id, &k(5)).unwrap();
        let entry = cache.lookup(map_id, &k(5)).unwrap().unwrap();
        assert_eq!(entry.ttl_ms, 0);
    }

    #[test]
    fn miss_outside_range_is_none() {
        let cache = MappingCache::new();
        let map_id = Uuid::new_v4();
        cache
            .add_or_update(map_id, snapshot(0, 100), TtlPolicy::ResetTtl)
            .unwrap();
        assert!(cache.lookup(map_id, &k(200)).unwrap().is_none());
    }

    #[test]
    fn preserve_ttl_policy_keeps_existing_ttl_on_refresh() {
        let cache = MappingCache::new();
        let map_id = Uuid::new_v4();
        cache
            .add_or_update(map_id, snapshot(0, 100), TtlPolicy::ResetTtl)
            .unwrap();
        cache.record_hit(map_id, &k(5)).unwrap();
        let ttl_before = cache.lookup(map_id, &k(5)).unwrap().unwrap().ttl_ms;
        cache
            .add_or_update(map_id, snapshot(0, 100), TtlPolicy::PreserveTtl)
            .unwrap();
        let ttl_after = cache.lookup(map_id, &k(5)).unwrap().unwrap().ttl_ms;
        assert_eq!(ttl_before, ttl_after);
    }
}
