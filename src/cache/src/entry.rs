use std::time::Instant;

use crate::model::MappingSnapshot;

/// TTL doubles on every hit recorded through [`crate::MappingCache::record_hit`],
/// capped here; resets to zero on refresh or explicit invalidation
/// (spec.md §4.D).
pub const MAX_TTL_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub mapping: MappingSnapshot,
    pub created_at: Instant,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn fresh(mapping: MappingSnapshot) -> Self {
        CacheEntry {
            mapping,
            created_at: Instant::now(),
            ttl_ms: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed().as_millis() as u64 > self.ttl_ms
    }

    pub fn double_ttl(&mut self) {
        self.ttl_ms = (self.ttl_ms.saturating_mul(2).max(1)).min(MAX_TTL_MS);
    }

    pub fn reset_ttl(&mut self) {
        self.ttl_ms = 0;
        self.created_at = Instant::now();
    }
}

/// Write-through policy for [`crate::MappingCache::add_or_update`]: whether
/// an existing entry's TTL is reset or left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    ResetTtl,
    PreserveTtl,
}
