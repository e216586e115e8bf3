//! Cross-worker on-demand snapshot signal. BGSAVE on any connection raises
//! this flag; the next timer fiber to observe it performs the write,
//! mirroring how [`crate::shutdown::ShutdownState`] lets one connection's
//! dispatch call wake every worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct SnapshotRequestState {
    requested: AtomicBool,
    iteration: AtomicU64,
}

impl SnapshotRequestState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Atomically claims a pending request so only one worker's timer
    /// fiber acts on a given BGSAVE.
    pub fn take_requested(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Acquire)
    }

    /// Bumps the counter tests can poll to await snapshot completion.
    /// Only call this once a write has actually succeeded; a failed
    /// dump must leave the counter untouched.
    pub fn record_success(&self) {
        self.iteration.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_requested_clears_the_flag() {
        let state = SnapshotRequestState::new();
        assert!(!state.take_requested());
        state.request();
        assert!(state.take_requested());
        assert!(!state.take_requested());
    }

    #[test]
    fn iteration_only_advances_on_recorded_success() {
        let state = SnapshotRequestState::new();
        assert_eq!(state.iteration(), 0);
        state.request();
        let _ = state.take_requested();
        assert_eq!(state.iteration(), 0, "claiming a request alone must not bump the counter");
        state.record_success();
        assert_eq!(state.iteration(), 1);
    }
}
