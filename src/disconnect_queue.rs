//! DisconnectQueue — rate-limited queue of pending RPC `Disconnect`
//! notifications.
//!
//! Under a mass disconnect (e.g. a gateway restart), blasting the
//! application server with one RPC call per lost session causes
//! secondary failure. This smooths the load to a configurable steady
//! rate; `shutdown` instead drains synchronously under a bounded total
//! deadline, since the process is exiting and best-effort notification
//! is all that is possible.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::Duration;

use crate::node::Node;
use crate::session::Session;

/// A FIFO queue of sessions awaiting their RPC `Disconnect` call.
pub struct DisconnectQueue {
    queue: Mutex<VecDeque<Session>>,
    shut_down: AtomicBool,
    rate: f64,
    node: Weak<Node>,
}

impl DisconnectQueue {
    /// Creates a new queue draining at `rate` RPC calls per second.
    #[must_use]
    pub fn new(rate: f64, node: Weak<Node>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            shut_down: AtomicBool::new(false),
            rate,
            node,
        }
    }

    /// Adds `session` to the queue, unless the queue has been shut down,
    /// in which case this is a no-op.
    pub fn enqueue(&self, session: Session) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(session);
    }

    /// Number of sessions currently queued.
    #[must_use]
    pub fn size(&self) -> usize {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    fn pop(&self) -> Option<Session> {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pop_front()
    }

    /// Worker loop: removes one session per tick at `rate` items/sec,
    /// invoking the Node's RPC `Disconnect` for each. Returns once the
    /// queue has been shut down and drained.
    pub async fn run(&self) {
        let period = Duration::from_secs_f64((1.0 / self.rate).max(0.001));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match self.pop() {
                Some(session) => self.disconnect_now(session).await,
                None if self.shut_down.load(Ordering::Acquire) => break,
                None => {}
            }
        }
    }

    /// Idempotent: drains the queue by invoking RPC `Disconnect`
    /// synchronously for every remaining session, bounded by `deadline`
    /// in total, then refuses further enqueues. `size()` returns 0 after
    /// a completed shutdown.
    pub async fn shutdown(&self, deadline: Duration) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let drain = async {
            while let Some(session) = self.pop() {
                self.disconnect_now(session).await;
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            log::warn!("DisconnectQueue shutdown deadline exceeded; remaining sessions dropped");
        }
    }

    async fn disconnect_now(&self, session: Session) {
        if let Some(node) = self.node.upgrade() {
            node.disconnect_now(&session).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support;

    #[test]
    fn new_queue_is_empty() {
        let queue = DisconnectQueue::new(50.0, Weak::new());
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let queue = DisconnectQueue::new(50.0, Weak::new());
        queue.shutdown(Duration::from_millis(10)).await;
        queue.shutdown(Duration::from_millis(10)).await;
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn enqueue_adds_a_session_awaiting_drain() {
        let queue = DisconnectQueue::new(50.0, Weak::new());
        let (session, _rx) = test_support::spawn(Weak::new()).await;
        queue.enqueue(session);
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_noop() {
        let queue = DisconnectQueue::new(50.0, Weak::new());
        queue.shutdown(Duration::from_millis(10)).await;
        let (session, _rx) = test_support::spawn(Weak::new()).await;
        queue.enqueue(session);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_sessions() {
        // With no `Node` behind the `Weak`, `disconnect_now` upgrades to
        // `None` and is a no-op, but the session is still popped off the
        // queue, so `shutdown` still observes an empty queue afterward.
        let queue = DisconnectQueue::new(50.0, Weak::new());
        let (session_a, _rx_a) = test_support::spawn(Weak::new()).await;
        let (session_b, _rx_b) = test_support::spawn(Weak::new()).await;
        queue.enqueue(session_a);
        queue.enqueue(session_b);
        assert_eq!(queue.size(), 2);

        queue.shutdown(Duration::from_millis(200)).await;
        assert_eq!(queue.size(), 0);
    }
}
