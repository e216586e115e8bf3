//! Per-database TTL index: a min-heap on `expiry_time_ms` driving active
//! expiration. Passive expiration (on access) happens independently in
//! [`crate::store`] and doesn't touch this heap directly; stale heap
//! entries for keys already deleted some other way are discarded lazily
//! when popped (the entry lookup at pop time is authoritative).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use cachegrand_hash::hash_key;

#[derive(Debug, Clone, Eq, PartialEq)]
struct TtlEntry {
    expiry_time_ms: u64,
    database_index: u32,
    key: Arc<[u8]>,
}

impl Ord for TtlEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expiry_time_ms.cmp(&other.expiry_time_ms)
    }
}

impl PartialOrd for TtlEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap (via `Reverse`) of pending expirations for one database.
#[derive(Default)]
pub struct TtlIndex {
    heap: BinaryHeap<Reverse<TtlEntry>>,
}

impl TtlIndex {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, database_index: u32, key: &[u8], expiry_time_ms: u64) {
        if expiry_time_ms == 0 {
            return;
        }
        self.heap.push(Reverse(TtlEntry {
            expiry_time_ms,
            database_index,
            key: Arc::from(key),
        }));
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Peeks the smallest expiry currently queued, without popping.
    pub fn peek_expiry(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(e)| e.expiry_time_ms)
    }

    /// Pops every entry whose `expiry_time_ms <= now_ms`. Callers must
    /// still re-check the entry's live expiry before deleting it, since a
    /// key may have been overwritten (and its TTL changed or cleared)
    /// after this heap entry was pushed — this heap can carry stale
    /// entries for keys no longer expiring at the recorded time.
    pub fn pop_expired(&mut self, now_ms: u64) -> Vec<(u32, Arc<[u8]>)> {
        let mut due = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.expiry_time_ms > now_ms {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            due.push((entry.database_index, entry.key));
        }
        due
    }

    /// Hash used to fold (database_index, key) for lookups elsewhere;
    /// exposed so callers that pop a due key can re-check the live entry
    /// via the same hash the storage table uses.
    pub fn hash_of(database_index: u32, key: &[u8]) -> u64 {
        hash_key(database_index, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_only_entries_due_by_now() {
        let mut ttl = TtlIndex::new();
        ttl.push(0, b"a", 1_000);
        ttl.push(0, b"b", 2_000);
        ttl.push(0, b"c", 3_000);

        let due = ttl.pop_expired(2_000);
        assert_eq!(due.len(), 2);
        assert_eq!(ttl.len(), 1);
        assert_eq!(ttl.peek_expiry(), Some(3_000));
    }

    #[test]
    fn zero_expiry_is_never_queued() {
        let mut ttl = TtlIndex::new();
        ttl.push(0, b"a", 0);
        assert!(ttl.is_empty());
    }
}
