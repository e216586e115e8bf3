//! The cross-worker shutdown signal. SHUTDOWN on any one connection
//! "transitions the entire worker set toward teardown" (`spec.md` §4.6);
//! every worker shares one `Arc<ShutdownState>` so one connection fiber's
//! dispatch call can wake every other worker's timer-fiber poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct ShutdownState {
    requested: AtomicBool,
    save: AtomicBool,
}

impl ShutdownState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records a shutdown request. `save` mirrors SHUTDOWN's SAVE/NOSAVE
    /// argument; once any caller requests a save, it stays requested even
    /// if a later (redundant) call didn't ask for one.
    pub fn trigger(&self, save: bool) {
        if save {
            self.save.store(true, Ordering::Relaxed);
        }
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn save_requested(&self) -> bool {
        self.save.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_latches_the_save_flag() {
        let state = ShutdownState::new();
        assert!(!state.is_requested());
        state.trigger(true);
        assert!(state.is_requested());
        assert!(state.save_requested());
    }

    #[test]
    fn a_later_non_saving_trigger_does_not_clear_save() {
        let state = ShutdownState::new();
        state.trigger(true);
        state.trigger(false);
        assert!(state.save_requested());
    }
}
