//! Entry indices: the unit the hash table points at.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::chunk::ChunkChain;

/// Combined {readers_counter, deleted_flag} word, updated atomically
/// together per spec's invariant that the pair moves as one unit. The
/// deleted flag occupies the top bit; the remaining 63 bits count active
/// readers.
#[derive(Debug, Default)]
pub struct EntryStatus(AtomicU64);

const DELETED_BIT: u64 = 1 << 63;

impl EntryStatus {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn is_deleted(&self) -> bool {
        self.0.load(Ordering::Acquire) & DELETED_BIT != 0
    }

    pub fn readers(&self) -> u64 {
        self.0.load(Ordering::Acquire) & !DELETED_BIT
    }

    /// Increments the reader count unless the entry is already marked
    /// deleted. Returns `false` when the entry must be treated as absent.
    pub fn pin(&self) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current & DELETED_BIT != 0 {
                return false;
            }
            let next = current + 1;
            if self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn unpin(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    /// Marks the entry deleted; existing readers keep their pin and must
    /// still call `unpin`, but new lookups will see `is_deleted() == true`.
    pub fn mark_deleted(&self) {
        self.0.fetch_or(DELETED_BIT, Ordering::AcqRel);
    }
}

/// The unit the hash table points at: a key, its value chunks, TTL/LRU/LFU
/// bookkeeping, and the combined reader/deleted status word.
#[derive(Debug)]
pub struct EntryIndex {
    pub database_index: u32,
    pub key: Box<[u8]>,
    pub value: ChunkChain,
    /// Absolute wall-clock ms; 0 = no expiry.
    pub expiry_time_ms: AtomicU64,
    pub creation_time_ms: u64,
    pub last_access_time_ms: AtomicU64,
    pub access_counter: AtomicU64,
    pub status: EntryStatus,
}

impl EntryIndex {
    /// Carries its own `database_index` (rather than relying on the
    /// caller to remember it) because the hash table folds the index into
    /// the slot hash and doesn't expose it back on lookup — callers that
    /// sample entries table-wide (eviction, scanning) need it to act on
    /// the right (database_index, key) pair.
    pub fn new(
        database_index: u32,
        key: &[u8],
        value: ChunkChain,
        now_ms: u64,
        expiry_time_ms: u64,
    ) -> Self {
        Self {
            database_index,
            key: Box::from(key),
            value,
            expiry_time_ms: AtomicU64::new(expiry_time_ms),
            creation_time_ms: now_ms,
            last_access_time_ms: AtomicU64::new(now_ms),
            access_counter: AtomicU64::new(0),
            status: EntryStatus::new(),
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        let expiry = self.expiry_time_ms.load(Ordering::Acquire);
        expiry != 0 && expiry <= now_ms
    }

    /// Called on every successful read: bumps last-access time (LRU) and
    /// the access counter (LFU).
    pub fn touch(&self, now_ms: u64) {
        self.last_access_time_ms.store(now_ms, Ordering::Release);
        self.access_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_expiry(&self, expiry_time_ms: u64) {
        self.expiry_time_ms.store(expiry_time_ms, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_fails_once_marked_deleted() {
        let status = EntryStatus::new();
        assert!(status.pin());
        status.mark_deleted();
        assert!(status.is_deleted());
        assert!(!status.pin());
        assert_eq!(status.readers(), 1);
        status.unpin();
        assert_eq!(status.readers(), 0);
    }

    #[test]
    fn expiry_zero_means_no_expiry() {
        let entry = EntryIndex::new(0, b"k", ChunkChain::from_memory(b"v"), 1_000, 0);
        assert!(!entry.is_expired_at(u64::MAX));
    }

    #[test]
    fn expiry_in_the_past_is_expired() {
        let entry = EntryIndex::new(0, b"k", ChunkChain::from_memory(b"v"), 1_000, 1_500);
        assert!(!entry.is_expired_at(1_499));
        assert!(entry.is_expired_at(1_500));
        assert!(entry.is_expired_at(1_501));
    }
}
