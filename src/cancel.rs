//! Cooperative cancellation token ("Cancellation").
//!
//! A bare `Arc<AtomicBool>` flag polled between steps is enough for a
//! thread looping on a short `recv_timeout`, but a thread parked on an
//! *unbounded* wait (a blocking bus read, a long sleep) also needs to
//! return from any outstanding `Execute` within a bounded time the moment
//! cancellation fires — polling a flag on a timer isn't prompt enough.
//! [`CancelToken`] keeps an atomic flag for the cheap `is_cancelled()`
//! check and adds a `crossbeam::channel` that closes on cancellation, so
//! a thread can `select!` on it alongside whatever else it's waiting for
//! and wake immediately.
//!
//! [`CancelSource`] is the owning half (held by the engine, one per node);
//! [`CancelToken`] is the cheap clone handed to `Execute` and to
//! background workers. Cancelling the source cancels every token derived
//! from it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};

struct Shared {
    cancelled: Arc<AtomicBool>,
    recv: Receiver<()>,
}

/// A cheaply-cloneable cancellation handle passed to every `Execute` call
/// and every background worker.
#[derive(Clone)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until cancelled, for a worker with nothing else to wait on.
    pub fn wait(&self) {
        let _ = self.shared.recv.recv();
    }

    /// Blocks until cancelled or `timeout` elapses; returns `true` if
    /// cancellation was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.shared.recv.recv_timeout(timeout) {
            Err(channel::RecvTimeoutError::Timeout) => false,
            _ => true,
        }
    }

    /// A receiver that becomes ready (by disconnecting) when this token is
    /// cancelled, for use in a `crossbeam::select!` alongside a node's own
    /// I/O channels.
    pub fn cancelled_recv(&self) -> Receiver<()> {
        self.shared.recv.clone()
    }
}

/// The owning half of a [`CancelToken`] family. Held by whoever should be
/// able to trigger cancellation (the engine, or a test). Calling
/// [`CancelSource::cancel`] closes every token handed out via
/// [`CancelSource::token`], waking every waiter.
#[derive(Debug)]
pub struct CancelSource {
    flag: Arc<AtomicBool>,
    // Dropping this sender closes `recv` for every cloned `CancelToken`.
    tx: Option<channel::Sender<()>>,
    rx: Receiver<()>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx: Some(tx),
            rx,
        }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            shared: Arc::new(Shared {
                cancelled: self.flag.clone(),
                recv: self.rx.clone(),
            }),
        }
    }

    /// Idempotent under concurrent callers: only the first call
    /// observes `tx` still present and actually closes the channel.
    pub fn cancel(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
        self.tx.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
