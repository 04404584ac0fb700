/// The (category, code) pair every user-visible error carries, per spec.md
/// §7. `ResultCode` is shared by the store, operation-engine, recovery, and
/// facade crates so a caller never has to parse a string to discriminate a
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,

    ShardMapExists,
    ShardMapDoesNotExist,

    ShardExists,
    ShardDoesNotExist,
    ShardVersionMismatch,
    ShardHasMappings,
    ShardIsOffline,

    MappingRangeAlreadyMapped,
    MappingDoesNotExist,
    MappingNotFoundForKey,
    MappingIsOffline,
    MappingLockMismatch,
    MappingRangesNotAdjacent,

    StaleVersion,
    StaleCache,

    StorageOperationFailure,
    StorageUnreachable,

    InvalidArgument,
    Canceled,
}

impl ResultCode {
    /// Transient codes are the only ones the retry policy should ever see;
    /// everything else is terminal (spec.md §7 "Propagation").
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ResultCode::StorageOperationFailure | ResultCode::StorageUnreachable
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ShardMap,
    ShardMapManager,
    Recovery,
    General,
}
