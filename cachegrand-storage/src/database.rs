//! Per-database_index bookkeeping: the TTL index plus lightweight stats
//! the dispatcher's DBSIZE/RANDOMKEY commands and the metrics endpoint
//! read from.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::ttl::TtlIndex;

#[derive(Default)]
pub struct DatabaseStats {
    pub keys_count: AtomicU64,
    pub size_bytes: AtomicU64,
}

impl DatabaseStats {
    pub fn record_insert(&self, value_len: u64) {
        self.keys_count.fetch_add(1, Ordering::Relaxed);
        self.size_bytes.fetch_add(value_len, Ordering::Relaxed);
    }

    pub fn record_remove(&self, value_len: u64) {
        self.keys_count.fetch_sub(1, Ordering::Relaxed);
        self.size_bytes.fetch_sub(value_len, Ordering::Relaxed);
    }

    /// Adjusts tracked size for an in-place overwrite, which changes
    /// `size_bytes` but not `keys_count`.
    pub fn replace_size(&self, old_len: u64, new_len: u64) {
        if new_len >= old_len {
            self.size_bytes.fetch_add(new_len - old_len, Ordering::Relaxed);
        } else {
            self.size_bytes.fetch_sub(old_len - new_len, Ordering::Relaxed);
        }
    }

    pub fn keys_count(&self) -> u64 {
        self.keys_count.load(Ordering::Relaxed)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}

pub struct DatabaseState {
    pub ttl: parking_lot::Mutex<TtlIndex>,
    pub stats: DatabaseStats,
}

impl DatabaseState {
    pub fn new() -> Self {
        Self {
            ttl: parking_lot::Mutex::new(TtlIndex::new()),
            stats: DatabaseStats::default(),
        }
    }
}

impl Default for DatabaseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-size set of per-database states, indexed by `database_index`.
pub struct DatabaseSet {
    databases: Vec<DatabaseState>,
}

impl DatabaseSet {
    pub fn new(max_user_databases: u32) -> Self {
        let mut databases = Vec::with_capacity(max_user_databases as usize);
        databases.resize_with(max_user_databases as usize, DatabaseState::new);
        Self { databases }
    }

    pub fn get(&self, database_index: u32) -> Option<&DatabaseState> {
        self.databases.get(database_index as usize)
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_inserts_and_removes() {
        let stats = DatabaseStats::default();
        stats.record_insert(10);
        stats.record_insert(5);
        assert_eq!(stats.keys_count(), 2);
        assert_eq!(stats.size_bytes(), 15);
        stats.record_remove(5);
        assert_eq!(stats.keys_count(), 1);
        assert_eq!(stats.size_bytes(), 10);
    }

    #[test]
    fn out_of_range_database_index_is_none() {
        let set = DatabaseSet::new(2);
        assert!(set.get(0).is_some());
        assert!(set.get(1).is_some());
        assert!(set.get(2).is_none());
    }
}
