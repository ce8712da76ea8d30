//! Thin sender wrapper for a graph edge. Edge forwarding always
//! blocks: a source's own drop-newest policy is implemented inside the
//! source itself (its internal production channel uses `try_send`, see
//! e.g. [`crate::ops::schedule`]) before a message ever reaches an edge,
//! so once the engine is forwarding an accepted message onward, normal
//! backpressure applies regardless of which kind of node produced it.

use crossbeam::channel::Sender;

use crate::message::Message;

#[derive(Clone, Debug)]
pub struct EdgeSender {
    inner: Sender<Message>,
}

impl EdgeSender {
    pub fn new(inner: Sender<Message>) -> Self {
        Self { inner }
    }

    /// Blocks until there's room downstream, so a slow sink throttles its
    /// whole upstream chain instead of the engine silently dropping
    /// messages on an internal edge.
    pub fn send_blocking(&self, msg: Message) -> bool {
        self.inner.send(msg).is_ok()
    }
}
