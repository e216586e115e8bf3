//! Top-level storage DB: ties the hash table, TTL index, eviction policy,
//! and shard backend together behind the get/set/delete/append API
//! described for command dispatch.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cachegrand_epoch::ThreadRegistration;
use cachegrand_hash::{hash_key, HashTable};

use crate::chunk::ChunkChain;
use crate::database::DatabaseSet;
use crate::entry::EntryIndex;
use crate::error::{ConditionOutcome, Result, StorageError};
use crate::eviction::{select_victim, EvictionCandidate, EvictionPolicy};
use crate::shard::{MemoryShardBackend, ShardBackend};
use crate::txn::{LockKey, LockMode, LockTable, Transaction};

/// Expiry option carried by SET/GETEX, mirroring Redis's EX/PX/EXAT/PXAT.
#[derive(Debug, Clone, Copy)]
pub enum ExpireOpt {
    Ex(u64),
    Px(u64),
    ExAt(u64),
    PxAt(u64),
    Persist,
}

impl ExpireOpt {
    fn resolve(self, now_ms: u64) -> u64 {
        match self {
            ExpireOpt::Ex(secs) => now_ms + secs * 1000,
            ExpireOpt::Px(ms) => now_ms + ms,
            ExpireOpt::ExAt(secs) => secs * 1000,
            ExpireOpt::PxAt(ms) => ms,
            ExpireOpt::Persist => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub nx: bool,
    pub xx: bool,
    pub keepttl: bool,
    pub expire: Option<ExpireOpt>,
    pub get: bool,
}

/// Clamps/defaults a requested expiry per `enforced_ttl` configuration:
/// if no expiry was requested and a default is configured, apply it; if
/// `max_ms` is configured, clamp any expiry to `now + max_ms`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnforcedTtl {
    pub default_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl EnforcedTtl {
    fn apply(&self, now_ms: u64, requested_expiry_ms: Option<u64>, keepttl: bool) -> u64 {
        if keepttl {
            return 0; // caller interprets 0 + keepttl as "leave existing expiry".
        }
        let mut expiry = requested_expiry_ms.unwrap_or(0);
        if expiry == 0 {
            if let Some(default_ms) = self.default_ms {
                expiry = now_ms + default_ms;
            }
        }
        if let Some(max_ms) = self.max_ms {
            let ceiling = now_ms + max_ms;
            if expiry == 0 || expiry > ceiling {
                expiry = ceiling;
            }
        }
        expiry
    }
}

pub struct StorageDbConfig {
    pub max_user_databases: u32,
    pub max_keys: usize,
    pub initial_chains: usize,
    pub lock_slot_count: usize,
    pub eviction_policy: EvictionPolicy,
    pub eviction_sample_size: usize,
    pub lfu_half_life_ms: u64,
    pub enforced_ttl: EnforcedTtl,
}

impl Default for StorageDbConfig {
    fn default() -> Self {
        Self {
            max_user_databases: 16,
            max_keys: 1_000_000,
            initial_chains: 1024,
            lock_slot_count: 4096,
            eviction_policy: EvictionPolicy::Lru,
            eviction_sample_size: 5,
            lfu_half_life_ms: 3_600_000,
            enforced_ttl: EnforcedTtl::default(),
        }
    }
}

/// The authoritative get/set/delete/append API over a shared hash table,
/// per-database TTL indices, and an optional shard-backed value store.
pub struct StorageDb {
    table: HashTable<EntryIndex>,
    databases: DatabaseSet,
    locks: LockTable,
    config: StorageDbConfig,
    shards: parking_lot::Mutex<Box<dyn ShardBackend>>,
    /// This `StorageDb`'s own epoch-GC participant, registered once at
    /// construction and held for its whole lifetime, matching the
    /// per-worker registration pattern in `cachegrand-worker`. Every
    /// retirement stages through this one handle instead of a fresh
    /// registration per call.
    retire_registration: ThreadRegistration<Arc<EntryIndex>>,
}

impl StorageDb {
    pub fn new(config: StorageDbConfig) -> Self {
        let table = HashTable::new(config.initial_chains, config.max_keys);
        let databases = DatabaseSet::new(config.max_user_databases);
        let locks = LockTable::new(config.lock_slot_count);
        let retire_registration = table.epoch_registry().register_thread();
        Self {
            table,
            databases,
            locks,
            config,
            shards: parking_lot::Mutex::new(Box::new(MemoryShardBackend)),
            retire_registration,
        }
    }

    pub fn with_shard_backend(mut self, backend: Box<dyn ShardBackend>) -> Self {
        self.shards = parking_lot::Mutex::new(backend);
        self
    }

    fn lock_key(&self, database_index: u32, key: &[u8], mode: LockMode) -> LockKey {
        let hash = hash_key(database_index, key);
        LockKey {
            hash,
            database_index,
            slot_index: self.locks.slot_index(hash),
            mode,
        }
    }

    fn open_txn(&self, keys: Vec<LockKey>) -> Transaction<'_> {
        Transaction::open(&self.locks, keys)
    }

    fn database(&self, database_index: u32) -> &crate::database::DatabaseState {
        self.databases
            .get(database_index)
            .expect("database_index validated by the dispatcher before reaching storage")
    }

    /// Passive expiration + readers_counter pin, shared by every read
    /// path. Returns `None` if the key is absent, expired, or deleted.
    fn lookup_and_pin(&self, database_index: u32, key: &[u8], now_ms: u64) -> Option<Arc<EntryIndex>> {
        let entry = self.table.get(database_index, key)?;
        if entry.status.is_deleted() || entry.is_expired_at(now_ms) {
            if !entry.status.is_deleted() {
                entry.status.mark_deleted();
                self.table.remove(database_index, key);
                self.database(database_index)
                    .stats
                    .record_remove(entry.value.total_len() as u64);
                self.stage_retired(entry);
            }
            return None;
        }
        if !entry.status.pin() {
            return None;
        }
        Some(entry)
    }

    /// `get(txn, dbi, key)`: acquires a read lock, pins the epoch-protected
    /// entry, and returns its materialized value. The caller's pin is
    /// released before returning since this API hands back owned bytes
    /// rather than a borrowed handle — safe because the pin only needs to
    /// outlive the read of `entry.value`, which happens entirely here.
    pub fn get(&self, database_index: u32, key: &[u8], now_ms: u64) -> Option<Vec<u8>> {
        let lock_key = self.lock_key(database_index, key, LockMode::Read);
        let _txn = self.open_txn(vec![lock_key]);

        let entry = self.lookup_and_pin(database_index, key, now_ms)?;
        entry.touch(now_ms);
        let value = entry.value.to_vec_memory_only();
        entry.status.unpin();
        Some(value)
    }

    pub fn exists(&self, database_index: u32, key: &[u8], now_ms: u64) -> bool {
        let lock_key = self.lock_key(database_index, key, LockMode::Read);
        let _txn = self.open_txn(vec![lock_key]);
        match self.lookup_and_pin(database_index, key, now_ms) {
            Some(entry) => {
                entry.status.unpin();
                true
            }
            None => false,
        }
    }

    pub fn ttl_ms(&self, database_index: u32, key: &[u8], now_ms: u64) -> Option<Option<u64>> {
        let lock_key = self.lock_key(database_index, key, LockMode::Read);
        let _txn = self.open_txn(vec![lock_key]);
        let entry = self.lookup_and_pin(database_index, key, now_ms)?;
        let expiry = entry.expiry_time_ms.load(Ordering::Acquire);
        entry.status.unpin();
        Some(if expiry == 0 {
            None
        } else {
            Some(expiry.saturating_sub(now_ms))
        })
    }

    /// `set(txn, dbi, key, value, opts)`. Returns the prior value when
    /// `opts.get` is set, wrapped so the caller can distinguish "applied
    /// but no prior value" from "not applied due to NX/XX".
    pub fn set(
        &self,
        database_index: u32,
        key: &[u8],
        value: &[u8],
        opts: SetOptions,
        now_ms: u64,
    ) -> Result<(ConditionOutcome, Option<Vec<u8>>)> {
        // Best-effort pre-check: evicting here, before this key's lock is
        // taken, avoids evict_one() trying to re-acquire a write lock this
        // transaction already holds (which could deadlock if the sampled
        // victim hashes to the same slot). A tiny race against concurrent
        // setters is fine: insert_new below still enforces max_keys.
        if self.table.len() >= self.config.max_keys && self.table.get(database_index, key).is_none() {
            let _ = self.evict_one(now_ms);
        }

        let lock_key = self.lock_key(database_index, key, LockMode::Write);
        let _txn = self.open_txn(vec![lock_key]);

        let existing = self
            .table
            .get(database_index, key)
            .filter(|e| !e.status.is_deleted() && !e.is_expired_at(now_ms));

        if opts.nx && existing.is_some() {
            let prior = existing.filter(|_| opts.get).map(|e| e.value.to_vec_memory_only());
            return Ok((ConditionOutcome::NotSatisfied, prior));
        }
        if opts.xx && existing.is_none() {
            return Ok((ConditionOutcome::NotSatisfied, None));
        }

        let expiry = if opts.keepttl {
            existing
                .as_ref()
                .map(|e| e.expiry_time_ms.load(Ordering::Acquire))
                .unwrap_or(0)
        } else {
            let requested_expiry = opts.expire.map(|e| e.resolve(now_ms));
            self.config.enforced_ttl.apply(now_ms, requested_expiry, false)
        };

        let prior_value = existing
            .as_ref()
            .filter(|_| opts.get)
            .map(|e| e.value.to_vec_memory_only());

        let new_entry = Arc::new(EntryIndex::new(
            database_index,
            key,
            ChunkChain::from_memory(value),
            now_ms,
            expiry,
        ));
        let new_len = new_entry.value.total_len() as u64;

        match self.table.update(database_index, key, new_entry.clone()) {
            Some(old_entry) => {
                old_entry.status.mark_deleted();
                self.database(database_index)
                    .stats
                    .replace_size(old_entry.value.total_len() as u64, new_len);
                self.stage_retired(old_entry);
            }
            None => {
                self.table
                    .insert_new(database_index, key, new_entry.clone())
                    .map_err(|_| StorageError::MaxKeysExceeded {
                        limit: self.config.max_keys,
                    })?;
                self.database(database_index).stats.record_insert(new_len);
            }
        }

        if expiry != 0 {
            self.database(database_index).ttl.lock().push(database_index, key, expiry);
        }

        Ok((ConditionOutcome::Applied, prior_value))
    }

    pub fn delete(&self, database_index: u32, key: &[u8]) -> bool {
        let lock_key = self.lock_key(database_index, key, LockMode::Write);
        let _txn = self.open_txn(vec![lock_key]);

        match self.table.remove(database_index, key) {
            Some(entry) => {
                entry.status.mark_deleted();
                self.database(database_index)
                    .stats
                    .record_remove(entry.value.total_len() as u64);
                self.stage_retired(entry);
                true
            }
            None => false,
        }
    }

    /// `append(txn, dbi, key, suffix)`: extends the last chunk in place if
    /// it fits, otherwise chains new chunks. The atomic swap into the hash
    /// table is the publication step, matching the spec's "an atomic
    /// length update is the publication step" — here the whole new entry
    /// is published atomically since chunks aren't mutated once shared.
    pub fn append(&self, database_index: u32, key: &[u8], suffix: &[u8], now_ms: u64) -> Result<usize> {
        let lock_key = self.lock_key(database_index, key, LockMode::Write);
        let _txn = self.open_txn(vec![lock_key]);

        let existing = self.table.get(database_index, key).filter(|e| {
            !e.status.is_deleted() && !e.is_expired_at(now_ms)
        });

        let (mut chain, expiry, creation_time_ms, old_len) = match &existing {
            Some(entry) => (
                entry.value.clone(),
                entry.expiry_time_ms.load(Ordering::Acquire),
                entry.creation_time_ms,
                entry.value.total_len() as u64,
            ),
            None => (ChunkChain::new(), 0, now_ms, 0),
        };
        chain.append_memory(suffix);
        let new_len = chain.total_len();

        let new_entry = Arc::new(EntryIndex::new(database_index, key, chain, creation_time_ms, expiry));
        match self.table.update(database_index, key, new_entry.clone()) {
            Some(old) => {
                old.status.mark_deleted();
                self.database(database_index)
                    .stats
                    .replace_size(old_len, new_len as u64);
                self.stage_retired(old);
            }
            None => {
                self.table
                    .insert_new(database_index, key, new_entry)
                    .map_err(|_| StorageError::MaxKeysExceeded {
                        limit: self.config.max_keys,
                    })?;
                self.database(database_index).stats.record_insert(new_len as u64);
            }
        };

        Ok(new_len)
    }

    pub fn persist(&self, database_index: u32, key: &[u8], now_ms: u64) -> bool {
        let lock_key = self.lock_key(database_index, key, LockMode::Write);
        let _txn = self.open_txn(vec![lock_key]);
        match self.lookup_and_pin(database_index, key, now_ms) {
            Some(entry) => {
                let had_expiry = entry.expiry_time_ms.load(Ordering::Acquire) != 0;
                entry.set_expiry(0);
                entry.status.unpin();
                had_expiry
            }
            None => false,
        }
    }

    pub fn expire_at(&self, database_index: u32, key: &[u8], expiry_time_ms: u64, now_ms: u64) -> bool {
        let lock_key = self.lock_key(database_index, key, LockMode::Write);
        let _txn = self.open_txn(vec![lock_key]);
        match self.lookup_and_pin(database_index, key, now_ms) {
            Some(entry) => {
                let expiry = self
                    .config
                    .enforced_ttl
                    .apply(now_ms, Some(expiry_time_ms), false);
                entry.set_expiry(expiry);
                entry.status.unpin();
                if expiry != 0 {
                    self.database(database_index).ttl.lock().push(database_index, key, expiry);
                }
                true
            }
            None => false,
        }
    }

    pub fn dbsize(&self, database_index: u32) -> u64 {
        self.database(database_index).stats.keys_count()
    }

    /// Number of configured databases (`max_user_databases`), for callers
    /// that need to iterate every database (the snapshot writer).
    pub fn database_count(&self) -> u32 {
        self.databases.len() as u32
    }

    /// One page of a cursor-based scan over `database_index`'s live keys.
    /// `cursor == 0` starts a traversal; a returned `next_cursor == 0`
    /// signals it has come back around (invariant 6 of `spec.md` §8).
    /// The underlying table scan isn't partitioned per database, so pages
    /// are filtered down to the requested database here; a page can
    /// legitimately come back empty without the traversal being done.
    pub fn scan(&self, database_index: u32, cursor: u64, batch_size: usize, now_ms: u64) -> (u64, Vec<Box<[u8]>>) {
        let result = self.table.scan(cursor, batch_size);
        let keys = result
            .entries
            .into_iter()
            .filter(|e| {
                e.value.database_index == database_index
                    && !e.value.status.is_deleted()
                    && !e.value.is_expired_at(now_ms)
            })
            .map(|e| e.key)
            .collect();
        (result.next_cursor, keys)
    }

    /// Deletes every live key in `database_index`. The shared table isn't
    /// partitioned per database, so this scans the whole table and
    /// confirms each candidate's presence in `database_index` with a
    /// targeted `get` before deleting it — a live entry might hash to the
    /// same chain under a different `database_index` and must not be
    /// touched.
    pub fn flushdb(&self, database_index: u32) -> u64 {
        let mut deleted = 0u64;
        let mut cursor = 0u64;
        loop {
            let result = self.table.scan(cursor, 256);
            for candidate in &result.entries {
                if self.table.get(database_index, &candidate.key).is_some()
                    && self.delete(database_index, &candidate.key)
                {
                    deleted += 1;
                }
            }
            cursor = result.next_cursor;
            if cursor == 0 {
                break;
            }
        }
        deleted
    }

    fn stage_retired(&self, entry: Arc<EntryIndex>) {
        self.retire_registration.stage(entry);
    }

    /// Eviction is global, not scoped to one database: `max_keys` bounds
    /// the whole shared table, so the sample is drawn table-wide and the
    /// victim is deleted from whichever database it actually belongs to
    /// (carried on the entry itself, since the table's hash folds the
    /// database index in without exposing it back on a plain scan).
    fn evict_one(&self, now_ms: u64) -> Result<()> {
        let sample_cursor = 0u64;
        let scan = self.table.scan(sample_cursor, self.config.eviction_sample_size);
        let candidates: Vec<EvictionCandidate> = scan
            .entries
            .into_iter()
            .map(|e| EvictionCandidate {
                key: e.key,
                entry: e.value,
            })
            .collect();

        let victim = select_victim(
            self.config.eviction_policy,
            &candidates,
            now_ms,
            self.config.lfu_half_life_ms,
        );

        match victim {
            Some(victim) => {
                self.delete(victim.entry.database_index, &victim.key);
                Ok(())
            }
            None => Err(StorageError::MaxKeysExceeded {
                limit: self.config.max_keys,
            }),
        }
    }

    /// Pops every TTL entry due by `now_ms` across every database and
    /// deletes them, re-checking each against the live entry since the
    /// heap can carry stale entries for keys whose TTL changed since being
    /// queued. Intended to be called periodically by the worker's timer
    /// fiber (active expiration).
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut swept = 0;
        for database_index in 0..self.databases.len() as u32 {
            let due = self.database(database_index).ttl.lock().pop_expired(now_ms);
            for (dbi, key) in due {
                if let Some(entry) = self.table.get(dbi, &key) {
                    if entry.is_expired_at(now_ms) && !entry.status.is_deleted() && self.delete(dbi, &key) {
                        swept += 1;
                    }
                }
            }
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> StorageDb {
        StorageDb::new(StorageDbConfig {
            max_user_databases: 4,
            max_keys: 1024,
            initial_chains: 16,
            lock_slot_count: 64,
            ..StorageDbConfig::default()
        })
    }

    #[test]
    fn set_then_get_roundtrips() {
        let db = db();
        db.set(0, b"foo", b"bar", SetOptions::default(), 1_000).unwrap();
        assert_eq!(db.get(0, b"foo", 1_000), Some(b"bar".to_vec()));
    }

    #[test]
    fn nx_refuses_to_overwrite_existing_key() {
        let db = db();
        db.set(0, b"foo", b"bar", SetOptions::default(), 1_000).unwrap();
        let (outcome, _) = db
            .set(0, b"foo", b"baz", SetOptions { nx: true, ..Default::default() }, 1_000)
            .unwrap();
        assert_eq!(outcome, ConditionOutcome::NotSatisfied);
        assert_eq!(db.get(0, b"foo", 1_000), Some(b"bar".to_vec()));
    }

    #[test]
    fn xx_refuses_to_create_missing_key() {
        let db = db();
        let (outcome, _) = db
            .set(0, b"missing", b"v", SetOptions { xx: true, ..Default::default() }, 1_000)
            .unwrap();
        assert_eq!(outcome, ConditionOutcome::NotSatisfied);
        assert_eq!(db.get(0, b"missing", 1_000), None);
    }

    #[test]
    fn expired_key_reads_as_absent() {
        let db = db();
        db.set(
            0,
            b"k",
            b"v",
            SetOptions { expire: Some(ExpireOpt::Px(100)), ..Default::default() },
            1_000,
        )
        .unwrap();
        assert_eq!(db.get(0, b"k", 1_050), Some(b"v".to_vec()));
        assert_eq!(db.get(0, b"k", 1_200), None);
    }

    #[test]
    fn database_index_isolates_identical_keys() {
        let db = db();
        db.set(0, b"k", b"db0", SetOptions::default(), 1_000).unwrap();
        db.set(1, b"k", b"db1", SetOptions::default(), 1_000).unwrap();
        assert_eq!(db.get(0, b"k", 1_000), Some(b"db0".to_vec()));
        assert_eq!(db.get(1, b"k", 1_000), Some(b"db1".to_vec()));
    }

    #[test]
    fn append_extends_existing_value() {
        let db = db();
        db.set(0, b"k", b"hello", SetOptions::default(), 1_000).unwrap();
        let len = db.append(0, b"k", b" world", 1_000).unwrap();
        assert_eq!(len, 11);
        assert_eq!(db.get(0, b"k", 1_000), Some(b"hello world".to_vec()));
    }

    #[test]
    fn append_creates_key_when_missing() {
        let db = db();
        let len = db.append(0, b"new", b"abc", 1_000).unwrap();
        assert_eq!(len, 3);
        assert_eq!(db.get(0, b"new", 1_000), Some(b"abc".to_vec()));
    }

    #[test]
    fn persist_clears_expiry() {
        let db = db();
        db.set(
            0,
            b"k",
            b"v",
            SetOptions { expire: Some(ExpireOpt::Ex(10)), ..Default::default() },
            1_000,
        )
        .unwrap();
        assert!(db.persist(0, b"k", 1_000));
        assert_eq!(db.ttl_ms(0, b"k", 1_000), Some(None));
    }

    #[test]
    fn delete_removes_key() {
        let db = db();
        db.set(0, b"k", b"v", SetOptions::default(), 1_000).unwrap();
        assert!(db.delete(0, b"k"));
        assert_eq!(db.get(0, b"k", 1_000), None);
        assert!(!db.delete(0, b"k"));
    }

    #[test]
    fn dbsize_tracks_inserts_and_deletes() {
        let db = db();
        db.set(0, b"a", b"1", SetOptions::default(), 1_000).unwrap();
        db.set(0, b"b", b"2", SetOptions::default(), 1_000).unwrap();
        assert_eq!(db.dbsize(0), 2);
        db.delete(0, b"a");
        assert_eq!(db.dbsize(0), 1);
    }

    #[test]
    fn scan_only_surfaces_the_requested_database() {
        let db = db();
        db.set(0, b"a", b"1", SetOptions::default(), 1_000).unwrap();
        db.set(1, b"b", b"2", SetOptions::default(), 1_000).unwrap();

        let mut seen = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next_cursor, keys) = db.scan(0, cursor, 16, 1_000);
            seen.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 1);
        assert_eq!(&*seen[0], b"a");
    }

    #[test]
    fn sweep_expired_deletes_due_keys_across_databases() {
        let db = db();
        db.set(
            0,
            b"k",
            b"v",
            SetOptions { expire: Some(ExpireOpt::Px(10)), ..Default::default() },
            1_000,
        )
        .unwrap();
        db.sweep_expired(1_020);
        assert_eq!(db.get(0, b"k", 1_020), None);
    }
}
