use crossbeam::queue::ArrayQueue;
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::{net::TcpStream, sync::Notify};

/// A socket handed off by the acceptor, paired with both endpoints of the
/// connection so workers don't need a second syscall to learn them.
pub(crate) struct AcceptedSocket {
    pub(crate) stream: TcpStream,
    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

/// Bounded handoff between the acceptor and the worker pool.
///
/// Backed by [`crossbeam::queue::ArrayQueue`], a lock-free fixed-capacity
/// ring buffer. Once full, [`enqueue`](Self::enqueue) parks the acceptor
/// until a worker frees a slot, applying backpressure straight to the
/// listening socket instead of growing memory without bound.
///
/// Shutdown is modeled as a one-way flip: once [`stop`](Self::stop) is
/// called, `enqueue` returns immediately and `dequeue` drains whatever is
/// left before reporting `more = false`.
pub(crate) struct AcceptQueue {
    inner: ArrayQueue<AcceptedSocket>,
    not_empty: Notify,
    not_full: Notify,
    stopping: AtomicBool,
}

impl AcceptQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity.max(1)),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            stopping: AtomicBool::new(false),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    /// Blocks until the socket is admitted or the queue is stopping.
    pub(crate) async fn enqueue(&self, socket: AcceptedSocket) {
        let mut socket = socket;

        loop {
            if self.stopping.load(Ordering::Acquire) {
                return;
            }

            match self.inner.push(socket) {
                Ok(()) => {
                    self.not_empty.notify_one();
                    return;
                }
                Err(rejected) => {
                    socket = rejected;
                    self.not_full.notified().await;
                }
            }
        }
    }

    /// Blocks until a socket is available or the queue is drained and
    /// stopping, in which case it returns `(None, false)` so the caller
    /// knows to exit rather than loop forever.
    pub(crate) async fn dequeue(&self) -> (Option<AcceptedSocket>, bool) {
        loop {
            if let Some(item) = self.inner.pop() {
                self.not_full.notify_one();
                return (Some(item), true);
            }

            if self.stopping.load(Ordering::Acquire) {
                return (None, false);
            }

            self.not_empty.notified().await;
        }
    }

    /// Wakes every waiter and makes future calls return immediately.
    pub(crate) fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}
