//! Hub — subscription index and broadcast fan-out.
//!
//! A mapping `stream -> set<Session>` plus the inverse `Session ->
//! set<stream>` (the inverse lives on [`crate::session::Session`] itself;
//! the Hub only owns the forward direction, and mutates both together so
//! they never disagree). Subscription mutations and broadcast lookups are
//! serialized on a single mutex; broadcasts snapshot the subscriber set
//! and release the lock before writing to any session's queue, so one
//! slow session can never block the others (design §4.2, §9).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::session::{Session, Uid};

/// The stream → subscribers index.
#[derive(Default)]
pub struct Hub {
    index: Mutex<HashMap<String, HashMap<Uid, Session>>>,
}

impl Hub {
    /// Creates an empty Hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `session` to `stream`'s subscriber set. Idempotent.
    pub fn subscribe(&self, session: &Session, stream: &str) {
        let mut index = self.lock();
        index
            .entry(stream.to_string())
            .or_default()
            .insert(session.uid(), session.clone());
        drop(index);
        session.add_subscription(stream);
    }

    /// Removes `session` from `stream`'s subscriber set, garbage
    /// collecting the stream entry if it becomes empty. Idempotent.
    pub fn unsubscribe(&self, session: &Session, stream: &str) {
        let mut index = self.lock();
        if let Some(subscribers) = index.get_mut(stream) {
            subscribers.remove(&session.uid());
            if subscribers.is_empty() {
                index.remove(stream);
            }
        }
        drop(index);
        session.remove_subscription(stream);
    }

    /// Removes `session` from every stream it is currently subscribed to.
    pub fn unsubscribe_all(&self, session: &Session) {
        let streams = session.take_subscriptions();
        if streams.is_empty() {
            return;
        }
        let mut index = self.lock();
        for stream in streams {
            if let Some(subscribers) = index.get_mut(&stream) {
                subscribers.remove(&session.uid());
                if subscribers.is_empty() {
                    index.remove(&stream);
                }
            }
        }
    }

    /// Delivers `payload` to every session currently subscribed to
    /// `stream`, in the order the Hub observed them. No ordering is
    /// guaranteed across different streams.
    pub fn broadcast(&self, stream: &str, payload: &str) {
        let subscribers: Vec<Session> = {
            let index = self.lock();
            index
                .get(stream)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        };
        for session in subscribers {
            session.send(payload.to_string());
        }
    }

    /// Number of distinct streams with at least one subscriber. Exposed
    /// for tests and diagnostics.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<Uid, Session>>> {
        self.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::session::test_support;
    use std::sync::Weak;

    #[test]
    fn new_hub_has_no_streams() {
        let hub = Hub::new();
        assert_eq!(hub.stream_count(), 0);
    }

    #[test]
    fn broadcast_on_unknown_stream_is_a_noop() {
        let hub = Hub::new();
        hub.broadcast("nobody_subscribed", "hello");
        assert_eq!(hub.stream_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_delivers_only_to_subscribers() {
        let hub = Hub::new();
        let (session_a, mut rx_a) = test_support::spawn(Weak::new()).await;
        let (session_b, mut rx_b) = test_support::spawn(Weak::new()).await;

        hub.subscribe(&session_a, "room:1");
        hub.broadcast("room:1", "hello");

        let frame = rx_a.try_recv().expect("subscriber should receive frame");
        match frame {
            Frame::Text { payload } => assert_eq!(payload, "hello"),
            Frame::Close { .. } => panic!("expected a text frame"),
        }
        assert!(rx_b.try_recv().is_err(), "non-subscriber must not receive anything");
    }

    #[tokio::test]
    async fn unsubscribe_all_removes_session_from_every_stream() {
        let hub = Hub::new();
        let (session, _rx) = test_support::spawn(Weak::new()).await;

        hub.subscribe(&session, "room:1");
        hub.subscribe(&session, "room:2");
        assert_eq!(hub.stream_count(), 2);

        hub.unsubscribe_all(&session);
        assert_eq!(hub.stream_count(), 0);
        assert!(session.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_garbage_collects_empty_streams() {
        let hub = Hub::new();
        let (session, _rx) = test_support::spawn(Weak::new()).await;

        hub.subscribe(&session, "room:1");
        hub.unsubscribe(&session, "room:1");

        assert_eq!(hub.stream_count(), 0);
    }
}
