use cache::MappingSnapshot;
use key_algebra::{KeyType, ShardRange};
use uuid::Uuid;

/// How a sub-range compares between the shard's local catalog and the
/// global catalog, per spec.md §4.F.Detect. A sub-range where both sides
/// agree (same mapping id) never produces a [`DiffRange`] -- only the three
/// disagreeing states below do.
#[derive(Debug, Clone)]
pub enum DiffState {
    /// The global catalog has a mapping here; the shard's local catalog has
    /// nothing.
    ShardMapOnly(MappingSnapshot),
    /// The shard's local catalog has a mapping here; the global catalog has
    /// nothing for this range (neither assigned to this shard nor
    /// overlapping from another shard).
    ShardOnly(MappingSnapshot),
    /// Both sides have a mapping here, but they disagree (different mapping
    /// ids -- the shard's copy and the global copy diverged).
    Conflicting {
        shard_map_mapping: MappingSnapshot,
        shard_mapping: MappingSnapshot,
    },
}

#[derive(Debug, Clone)]
pub struct DiffRange {
    pub range: ShardRange,
    pub state: DiffState,
}

/// The outstanding result of one `detect_mapping_differences` call, kept in
/// [`crate::manager::RecoveryManager`]'s process-local token table until a
/// matching `resolve_mapping_differences` (or `Ignore`) consumes it (spec.md
/// §4.F: "the manager keeps the token mapping in process memory until
/// Resolve clears it").
#[derive(Debug, Clone)]
pub struct DiffToken {
    pub token_id: Uuid,
    pub shard_map_id: Uuid,
    pub shard_id: Uuid,
    pub key_type: KeyType,
    pub differences: Vec<DiffRange>,
}

/// Which side a `resolve_mapping_differences` call declares authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingDifferenceResolution {
    /// The global catalog (shard map) wins: the shard's local catalog is
    /// rewritten to match it.
    KeepShardMapMapping,
    /// The shard's local catalog wins: the global catalog is rewritten to
    /// match it.
    KeepShardMapping,
    /// Drop the token without changing either side.
    Ignore,
}
