//! The storage database: entry indices, value chunks, shard files, TTL
//! and eviction indices, transaction locking, and snapshotting, behind
//! the [`store::StorageDb`] get/set/delete/append API.

pub mod chunk;
pub mod database;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod shard;
pub mod snapshot;
pub mod store;
pub mod ttl;
pub mod txn;

pub use chunk::{Chunk, ChunkChain, CHUNK_MAX};
pub use database::{DatabaseSet, DatabaseState, DatabaseStats};
pub use entry::{EntryIndex, EntryStatus};
pub use error::{ConditionOutcome, Result, StorageError};
pub use eviction::{select_victim, EvictionCandidate, EvictionPolicy};
pub use shard::{MemoryShardBackend, ShardBackend, ShardSet, DEFAULT_SHARD_MAX_BYTES};
pub use store::{EnforcedTtl, ExpireOpt, SetOptions, StorageDb, StorageDbConfig};
pub use ttl::TtlIndex;
pub use txn::{LockKey, LockMode, LockTable, Transaction};
