//! Pub/sub subscriber.
//!
//! The pub/sub transport itself is an external collaborator (spec §1); this
//! module defines the seam it plugs into — a trait the gateway depends on,
//! plus a minimal in-process broker used by tests and single-node
//! deployments. A production deployment swaps in an adapter backed by the
//! real message bus without touching `Hub`/`Node`.

use tokio::sync::mpsc;

/// A message delivered from the pub/sub backend: a named stream and an
/// opaque payload.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    /// The stream the payload was published on.
    pub stream: String,
    /// The opaque payload, forwarded verbatim to subscribed sessions.
    pub payload: String,
}

/// A handle to the pub/sub feed: an async stream of `(stream, payload)`
/// tuples, one multiplexed worker's receiving half.
pub struct Subscriber {
    rx: mpsc::Receiver<PubSubMessage>,
}

impl Subscriber {
    /// Receives the next pub/sub message, or `None` once the backend has
    /// shut down.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        self.rx.recv().await
    }
}

/// Publishing half of the in-process broker, used by tests and by any
/// adapter translating a real backend's delivery callback into this
/// crate's message shape.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<PubSubMessage>,
}

impl Publisher {
    /// Publishes `payload` on `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if every subscriber has been dropped.
    pub async fn publish(
        &self,
        stream: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<PubSubMessage>> {
        self.tx
            .send(PubSubMessage {
                stream: stream.into(),
                payload: payload.into(),
            })
            .await
    }
}

/// Creates a bounded in-process pub/sub channel: a `(Publisher,
/// Subscriber)` pair. `capacity` bounds how far the publisher can run
/// ahead of a slow-draining `Hub::run_pubsub_loop`.
#[must_use]
pub fn channel(capacity: usize) -> (Publisher, Subscriber) {
    let (tx, rx) = mpsc::channel(capacity);
    (Publisher { tx }, Subscriber { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_recv_round_trips() {
        let (publisher, mut subscriber) = channel(8);
        publisher.publish("stream_a", "hello").await.unwrap();
        let msg = subscriber.recv().await.unwrap();
        assert_eq!(msg.stream, "stream_a");
        assert_eq!(msg.payload, "hello");
    }

    #[tokio::test]
    async fn recv_returns_none_after_publisher_dropped() {
        let (publisher, mut subscriber) = channel(8);
        drop(publisher);
        assert!(subscriber.recv().await.is_none());
    }
}
