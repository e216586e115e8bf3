//! Per-object-kind epoch-based reclamation.
//!
//! One [`Registry<T>`] is created per reclaimed object kind (the original
//! cachegrand sources keep one registry for hash-table nodes and one for
//! storage entry indices; callers here do the same by instantiating a
//! separate `Registry` per kind rather than routing through a shared,
//! type-erased one).
//!
//! Each worker thread registers once via [`Registry::register_thread`],
//! getting back a [`ThreadHandle`] it keeps for the lifetime of the
//! worker. Staging an object for destruction ([`Registry::stage`]) tags it
//! with the registry's current global epoch; calling
//! [`Registry::advance_epoch`] at a quiescent point catches the calling
//! thread's observed epoch up to the current global epoch. A dedicated
//! collector (driven by whoever owns the registry, typically a timer
//! fiber) calls [`Registry::collect`] periodically: it bumps the global
//! epoch, takes the minimum observed epoch across all registered threads,
//! and destroys every staged object retired strictly before that minimum.
//!
//! Safety argument: an object is staged at the epoch at which it stops
//! being reachable through the shared structure (the pointer swap that
//! makes it unreachable happens-before the stage call). A thread whose
//! observed epoch is still below the object's stage epoch may be
//! mid-operation and could have read the old pointer before the swap; once
//! every thread's observed epoch has caught up past the stage epoch, every
//! thread still running started its current operation after the swap, so
//! none of them can be holding the old pointer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Size of one staged-object ring, matching the C sources'
/// `EPOCH_GC_STAGED_OBJECTS_RING_SIZE`.
pub const STAGED_RING_SIZE: usize = 8 * 1024;

/// Number of objects handed to the destructor callback per batch, matching
/// `EPOCH_GC_STAGED_OBJECT_DESTRUCTOR_CB_BATCH_SIZE`.
pub const DESTRUCTOR_BATCH: usize = 16;

type Epoch = u64;

struct StagedObject<T> {
    epoch: Epoch,
    object: T,
}

/// One bounded ring of staged objects. When full, the thread allocates a
/// new ring and keeps staging into that one; old rings stay linked until
/// fully drained by the collector.
struct StagedRing<T> {
    items: VecDeque<StagedObject<T>>,
}

impl<T> StagedRing<T> {
    fn new() -> Self {
        Self {
            items: VecDeque::with_capacity(STAGED_RING_SIZE),
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= STAGED_RING_SIZE
    }
}

/// Per-thread registration record.
pub struct ThreadHandle<T> {
    observed_epoch: AtomicU64,
    terminated: AtomicBool,
    rings: Mutex<Vec<StagedRing<T>>>,
}

impl<T> ThreadHandle<T> {
    fn new(epoch: Epoch) -> Self {
        Self {
            observed_epoch: AtomicU64::new(epoch),
            terminated: AtomicBool::new(false),
            rings: Mutex::new(vec![StagedRing::new()]),
        }
    }

    /// The epoch this thread last confirmed it was quiescent at.
    pub fn observed_epoch(&self) -> Epoch {
        self.observed_epoch.load(Ordering::Acquire)
    }
}

/// RAII registration: on drop the thread is marked terminated, and the
/// next [`Registry::collect`] call drains and frees its record once its
/// rings are empty.
pub struct ThreadRegistration<T> {
    registry: Arc<Registry<T>>,
    handle: Arc<ThreadHandle<T>>,
}

impl<T> ThreadRegistration<T> {
    pub fn handle(&self) -> &Arc<ThreadHandle<T>> {
        &self.handle
    }

    pub fn stage(&self, object: T) {
        self.registry.stage(&self.handle, object);
    }

    pub fn advance_epoch(&self) {
        self.registry.advance_epoch(&self.handle);
    }
}

impl<T> Drop for ThreadRegistration<T> {
    fn drop(&mut self) {
        self.handle.terminated.store(true, Ordering::Release);
    }
}

/// A per-object-kind reclamation registry.
pub struct Registry<T> {
    global_epoch: AtomicU64,
    threads: Mutex<Vec<Arc<ThreadHandle<T>>>>,
    destructor: Box<dyn Fn(Vec<T>) + Send + Sync>,
}

impl<T> Registry<T> {
    /// `destructor` is invoked with batches of at most [`DESTRUCTOR_BATCH`]
    /// objects whose retirement epoch has been observed by every
    /// registered thread. It must be idempotent and order-independent
    /// within a batch, as required by `spec.md` §4.1.
    pub fn new<F>(destructor: F) -> Arc<Self>
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        Arc::new(Self {
            global_epoch: AtomicU64::new(1),
            threads: Mutex::new(Vec::new()),
            destructor: Box::new(destructor),
        })
    }

    pub fn current_epoch(&self) -> Epoch {
        self.global_epoch.load(Ordering::Acquire)
    }

    /// Registers the calling thread, returning an RAII handle.
    pub fn register_thread(self: &Arc<Self>) -> ThreadRegistration<T> {
        let handle = Arc::new(ThreadHandle::new(self.current_epoch()));
        self.threads.lock().unwrap().push(handle.clone());
        ThreadRegistration {
            registry: self.clone(),
            handle,
        }
    }

    /// Stages `object` for deferred destruction, tagged with the current
    /// global epoch. Degrades to synchronous, inline destruction if the
    /// ring cannot grow (out-of-memory), per `spec.md` §4.1 "Failure".
    pub fn stage(&self, handle: &ThreadHandle<T>, object: T) {
        let epoch = self.current_epoch();
        let mut rings = handle.rings.lock().unwrap();
        let needs_new_ring = match rings.last() {
            Some(ring) => ring.is_full(),
            None => true,
        };
        if needs_new_ring {
            let mut new_ring = StagedRing::new();
            if new_ring.items.try_reserve(STAGED_RING_SIZE).is_err() {
                drop(rings);
                log::warn!("epoch gc: out of memory staging object, destroying inline");
                (self.destructor)(vec![object]);
                return;
            }
            new_ring.items.push_back(StagedObject { epoch, object });
            rings.push(new_ring);
            return;
        }
        rings
            .last_mut()
            .expect("ring list initialized with a first ring")
            .items
            .push_back(StagedObject { epoch, object });
    }

    /// Catches the calling thread's observed epoch up to the current
    /// global epoch. Call at every suspension/quiescent point.
    pub fn advance_epoch(&self, handle: &ThreadHandle<T>) {
        handle
            .observed_epoch
            .store(self.current_epoch(), Ordering::Release);
    }

    /// Runs one collection pass: bumps the global epoch, computes the
    /// minimum observed epoch across all live threads, and destroys every
    /// object staged strictly before that minimum. Returns the number of
    /// objects destroyed. Also drops bookkeeping for terminated threads
    /// once their rings are fully drained.
    pub fn collect(&self) -> usize {
        self.global_epoch.fetch_add(1, Ordering::AcqRel);

        let mut threads = self.threads.lock().unwrap();
        let min_epoch = threads
            .iter()
            .map(|t| t.observed_epoch())
            .min()
            .unwrap_or_else(|| self.current_epoch());

        let mut destroyed = 0usize;
        let mut batch = Vec::with_capacity(DESTRUCTOR_BATCH);

        threads.retain(|thread| {
            let mut rings = thread.rings.lock().unwrap();

            for ring in rings.iter_mut() {
                while let Some(front) = ring.items.front() {
                    if front.epoch >= min_epoch {
                        break;
                    }
                    let staged = ring.items.pop_front().unwrap();
                    batch.push(staged.object);
                    destroyed += 1;
                    if batch.len() == DESTRUCTOR_BATCH {
                        (self.destructor)(std::mem::take(&mut batch));
                    }
                }
            }
            rings.retain(|ring| !ring.items.is_empty() || ring.is_full());
            if rings.is_empty() {
                rings.push(StagedRing::new());
            }

            let terminated = thread.terminated.load(Ordering::Acquire);
            let drained = rings.iter().all(|r| r.items.is_empty());
            drop(rings);

            // Keep the thread registered unless it terminated and has
            // nothing left staged.
            !(terminated && drained)
        });

        if !batch.is_empty() {
            (self.destructor)(batch);
        }

        destroyed
    }

    /// Number of currently registered (not yet reaped) thread records.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn stages_and_collects_once_quiescent() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let destroyed2 = destroyed.clone();
        let registry: Arc<Registry<u32>> = Registry::new(move |batch| {
            destroyed2.fetch_add(batch.len(), Ordering::SeqCst);
        });

        let reg_a = registry.register_thread();
        let reg_b = registry.register_thread();

        reg_a.stage(1);
        reg_a.stage(2);

        // b has not advanced past the stage epoch yet, so nothing is safe
        // to collect.
        registry.collect();
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        reg_a.advance_epoch();
        reg_b.advance_epoch();

        registry.collect();
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn terminated_thread_is_reaped_after_drain() {
        let registry: Arc<Registry<u32>> = Registry::new(|_batch| {});
        {
            let reg = registry.register_thread();
            reg.stage(7);
            reg.advance_epoch();
        }
        assert_eq!(registry.thread_count(), 1);
        registry.collect();
        registry.collect();
        assert_eq!(registry.thread_count(), 0);
    }

    #[test]
    fn many_objects_span_multiple_rings() {
        let registry: Arc<Registry<u32>> = Registry::new(|_batch| {});
        let reg = registry.register_thread();
        for i in 0..(STAGED_RING_SIZE * 2 + 5) {
            reg.stage(i as u32);
        }
        reg.advance_epoch();
        let mut total = 0;
        for _ in 0..4 {
            total += registry.collect();
        }
        assert_eq!(total, STAGED_RING_SIZE * 2 + 5);
    }
}
