use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tokio::sync::Notify;

pub(crate) const RUNNING: u8 = 0;
pub(crate) const STOPPING: u8 = 1;
pub(crate) const STOPPED: u8 = 2;

/// Coordinates the two-phase shutdown of a running [`Server`](super::server_impl::Server).
///
/// `stop_flag` only ever moves forward: `RUNNING -> STOPPING -> STOPPED`.
/// The acceptor is the sole writer of `STOPPED`; everyone else only ever
/// requests `STOPPING` and waits.
///
/// Sequence: a caller requests a stop, the acceptor observes it on its next
/// poll, stops handing out new sockets and wakes parked workers (who see
/// `more = false` from the queue and exit), then waits for every worker to
/// report out before publishing `STOPPED`.
pub(crate) struct ShutdownCoordinator {
    stop_flag: AtomicU8,
    workers_remaining: AtomicUsize,
    all_workers_gone: Notify,
}

impl ShutdownCoordinator {
    pub(crate) fn new(worker_count: usize) -> Self {
        Self {
            stop_flag: AtomicU8::new(RUNNING),
            workers_remaining: AtomicUsize::new(worker_count),
            all_workers_gone: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> u8 {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == RUNNING
    }

    /// Moves `RUNNING -> STOPPING`. A no-op if already stopping or stopped.
    pub(crate) fn request_stop(&self) {
        let _ = self
            .stop_flag
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Called by a worker task right before it exits its dequeue loop.
    pub(crate) fn worker_exited(&self) {
        if self.workers_remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.all_workers_gone.notify_waiters();
        }
    }

    pub(crate) async fn wait_for_workers(&self) {
        while self.workers_remaining.load(Ordering::Acquire) > 0 {
            self.all_workers_gone.notified().await;
        }
    }

    /// Moves `STOPPING -> STOPPED`. Only the acceptor should call this, after
    /// [`wait_for_workers`](Self::wait_for_workers) returns.
    pub(crate) fn mark_stopped(&self) {
        self.stop_flag.store(STOPPED, Ordering::Release);
    }
}
