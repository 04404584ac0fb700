use serde::{Deserialize, Serialize};

/// Every operation code named in spec.md §4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationCode {
    AddShardMap,
    RemoveShardMap,
    AddShard,
    UpdateShard,
    RemoveShard,
    AttachShard,
    DetachShard,
    AddRangeMapping,
    AddPointMapping,
    UpdateRangeMapping,
    UpdatePointMapping,
    RemoveRangeMapping,
    RemovePointMapping,
    SplitMapping,
    MergeMappings,
    ReplaceMappings,
    LockMapping,
    UnlockMapping,
    AddSchemaInfo,
    RemoveSchemaInfo,
    UpdateSchemaInfo,
    UpgradeStore,
}

/// A point in the phase state machine (spec.md §4.C's diagram). `Done` is
/// terminal and never stored as an `undo_start_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    GlobalPre,
    LocalSource,
    LocalTarget,
    GlobalPost,
    UpdateCache,
    UndoLocalTarget,
    UndoLocalSource,
    UndoGlobalPost,
    Done,
}

/// `Phase` restricted to the undo-capable variants, stored verbatim in the
/// pending-log row so recovery knows where to resume (spec.md §4.C).
pub type UndoStartState = Phase;

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::GlobalPre => "GlobalPre",
            Phase::LocalSource => "LocalSource",
            Phase::LocalTarget => "LocalTarget",
            Phase::GlobalPost => "GlobalPost",
            Phase::UpdateCache => "UpdateCache",
            Phase::UndoLocalTarget => "UndoLocalTarget",
            Phase::UndoLocalSource => "UndoLocalSource",
            Phase::UndoGlobalPost => "UndoGlobalPost",
            Phase::Done => "Done",
        }
    }

    pub fn from_str(s: &str) -> Option<Phase> {
        Some(match s {
            "GlobalPre" => Phase::GlobalPre,
            "LocalSource" => Phase::LocalSource,
            "LocalTarget" => Phase::LocalTarget,
            "GlobalPost" => Phase::GlobalPost,
            "UpdateCache" => Phase::UpdateCache,
            "UndoLocalTarget" => Phase::UndoLocalTarget,
            "UndoLocalSource" => Phase::UndoLocalSource,
            "UndoGlobalPost" => Phase::UndoGlobalPost,
            "Done" => Phase::Done,
            _ => return None,
        })
    }
}
