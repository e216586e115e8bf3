//! Per-worker cooperative fiber scheduler.
//!
//! `spec.md` §9 explicitly allows backing the fiber abstraction with
//! "stackless coroutines or OS tasks, provided the suspension-point
//! contract of §5 is preserved and there is no preemption within a
//! worker". This crate takes that option: one [`Scheduler`] wraps a
//! single-threaded Tokio runtime plus a [`tokio::task::LocalSet`], and a
//! "fiber" is a task spawned onto that local set. Because the runtime is
//! current-thread and single-threaded, fibers only ever interleave at
//! `.await` points — exactly the suspension points `spec.md` §4.3 and §5
//! enumerate (I/O, `yield_now`, `sleep_ms`, end of fiber) — which
//! preserves "nothing preempts it" and "operations of one fiber happen in
//! program order" without hand-rolled stack switching.
//!
//! Per the design notes in `spec.md` §9 ("model every fallible operation
//! as returning a sum type... let the scheduler context carry a
//! cancellation token rather than a shared error slot"), fallible fiber
//! bodies return `Result<T, E>` directly instead of threading a
//! thread-local error slot, and cancellation is carried explicitly via
//! [`tokio_util::sync::CancellationToken`] rather than a terminate flag
//! polled manually at suspension points.

use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, LocalSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FiberError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out after {0}ms")]
    TimedOut(u64),
}

/// One worker's scheduler: a current-thread Tokio runtime plus the
/// `LocalSet` fibers are spawned onto, and a root cancellation token
/// whose children are handed to every fiber so a single call can cancel
/// them all (used at worker teardown).
pub struct Scheduler {
    runtime: tokio::runtime::Runtime,
    local: LocalSet,
    root_cancel: CancellationToken,
}

impl Scheduler {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            local: LocalSet::new(),
            root_cancel: CancellationToken::new(),
        })
    }

    /// A cancellation token scoped to this scheduler; fibers should spawn
    /// with a child of this token so worker teardown can cancel every
    /// live fiber in one call.
    pub fn root_cancellation(&self) -> CancellationToken {
        self.root_cancel.clone()
    }

    /// Spawns a fiber onto this scheduler. The fiber gets its own child
    /// of the scheduler's root cancellation token so it can be cancelled
    /// individually (per-operation timeout) or as part of a full worker
    /// shutdown (root token cancelled).
    pub fn spawn<F, Fut>(&self, body: F) -> FiberHandle
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let cancel = self.root_cancel.child_token();
        let fut = body(cancel.clone());
        let join = self.local.spawn_local(fut);
        FiberHandle { join, cancel }
    }

    /// Drives the scheduler until `fut` completes, running all spawned
    /// fibers cooperatively alongside it. This is the scheduler's "tick
    /// loop": call once with a future that resolves when the worker
    /// should shut down (e.g. awaiting the root cancellation token).
    pub fn run_until<F: Future>(&self, fut: F) -> F::Output {
        self.local.block_on(&self.runtime, fut)
    }

    /// Requests termination of every fiber spawned on this scheduler.
    pub fn request_terminate(&self) {
        self.root_cancel.cancel();
    }

    pub fn is_terminating(&self) -> bool {
        self.root_cancel.is_cancelled()
    }
}

/// A handle to a spawned fiber.
pub struct FiberHandle {
    join: JoinHandle<()>,
    cancel: CancellationToken,
}

impl FiberHandle {
    /// Sets this fiber's terminate flag; the next suspension point inside
    /// the fiber observes it (via [`wait_io`]/[`with_timeout`] racing
    /// `cancelled()`) and the fiber body should unwind.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<(), JoinError> {
        self.join.await
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Explicit yield: the fiber goes back to the ready queue behind anything
/// else already ready, without arming any deadline.
pub async fn yield_now() {
    tokio::task::yield_now().await;
}

/// Puts the fiber in the scheduler's sleeping queue until the deadline
/// elapses.
pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Runs `fut` to completion unless the fiber's cancellation token fires
/// first, in which case the I/O future is dropped and
/// [`FiberError::Cancelled`] is returned. Models "any I/O call... is a
/// suspension point" plus the cancellation contract of §4.3: whichever
/// completes first wins, the other is simply dropped.
pub async fn wait_io<F>(fut: F, cancel: &CancellationToken) -> Result<F::Output, FiberError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FiberError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Like [`wait_io`] but additionally arms a sleeping deadline; whichever
/// of {the I/O completing, the deadline elapsing, cancellation} wins,
/// the other two are dropped. Models per-operation `read_ms`/`write_ms`
/// timeouts from `spec.md` §4.3.
pub async fn with_timeout<F>(
    fut: F,
    timeout_ms: Option<u64>,
    cancel: &CancellationToken,
) -> Result<F::Output, FiberError>
where
    F: Future,
{
    match timeout_ms {
        None => wait_io(fut, cancel).await,
        Some(ms) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FiberError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Err(FiberError::TimedOut(ms)),
                out = fut => Ok(out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fibers_interleave_only_at_suspension_points() {
        let scheduler = Scheduler::new().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = log.clone();
        scheduler.spawn(move |_cancel| async move {
            log_a.borrow_mut().push("a1");
            yield_now().await;
            log_a.borrow_mut().push("a2");
        });

        let log_b = log.clone();
        scheduler.spawn(move |_cancel| async move {
            log_b.borrow_mut().push("b1");
            yield_now().await;
            log_b.borrow_mut().push("b2");
        });

        scheduler.run_until(async {
            sleep_ms(10).await;
        });

        let seq = log.borrow().clone();
        assert_eq!(seq, vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn cancellation_wins_over_pending_io() {
        let scheduler = Scheduler::new().unwrap();
        let result = scheduler.run_until(async {
            let cancel = CancellationToken::new();
            let cancel2 = cancel.clone();
            tokio::task::spawn_local(async move {
                sleep_ms(1).await;
                cancel2.cancel();
            });
            wait_io(std::future::pending::<()>(), &cancel).await
        });
        assert!(matches!(result, Err(FiberError::Cancelled)));
    }

    #[test]
    fn timeout_fires_before_completion() {
        let scheduler = Scheduler::new().unwrap();
        let cancel = CancellationToken::new();
        let result = scheduler.run_until(with_timeout(
            std::future::pending::<()>(),
            Some(5),
            &cancel,
        ));
        assert!(matches!(result, Err(FiberError::TimedOut(5))));
    }
}
