use std::fmt;

/// Errors the storage DB itself can raise. Dispatcher-level concerns
/// (protocol, auth, argument validation) live closer to the wire and are
/// not modelled here; this enum covers the kinds a storage operation can
/// actually produce.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("max_keys exceeded ({limit})")]
    MaxKeysExceeded { limit: usize },

    #[error("shard full, no new shard allocatable")]
    ShardExhausted,

    #[error("shard I/O failure: {0}")]
    ShardIo(#[source] std::io::Error),

    #[error("snapshot I/O failure: {0}")]
    SnapshotIo(#[source] std::io::Error),

    #[error("snapshot file is corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Outcome of a conditional write (NX/XX). Not an error per spec's own
/// taxonomy — callers map this to an empty-bulk reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOutcome {
    Applied,
    NotSatisfied,
}

impl fmt::Display for ConditionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionOutcome::Applied => write!(f, "applied"),
            ConditionOutcome::NotSatisfied => write!(f, "not satisfied"),
        }
    }
}
