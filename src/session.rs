//! Session — per-connection state and the reader/writer/ping tasks that
//! drive one client's lifetime.
//!
//! A `Session` is a cheap, cloneable handle (`Arc` inside) so the Hub, the
//! ping timer, and command dispatch can all hold a reference without
//! coordinating lifetimes explicitly. The only strong owner of a
//! session's existence is the [`crate::node::Node`], which drives
//! destruction (see the design notes on avoiding Session↔Node↔Hub
//! reference cycles).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::constants::{self, close_code};
use crate::error::GatewayError;
use crate::frame::Frame;
use crate::node::Node;
use crate::ws::{WsReader, WsWriter};

/// Opaque identifier, unique per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Uid(pub uuid::Uuid);

impl Uid {
    /// Generates a fresh, random session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The URL, forwarded headers, and connection-scoped state passed on
/// every RPC call for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionEnv {
    /// The upgrade request URL.
    pub url: String,
    /// Forwarded request headers.
    pub headers: HashMap<String, String>,
    /// Opaque connection state, replaced wholesale by RPC responses.
    pub cstate: HashMap<String, String>,
}

impl From<SessionEnv> for crate::rpc::Env {
    fn from(env: SessionEnv) -> Self {
        crate::rpc::Env {
            url: env.url,
            headers: env.headers,
            cstate: env.cstate,
        }
    }
}

/// The session's position in its lifecycle (design §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade accepted; RPC `Connect` not yet issued.
    New,
    /// RPC `Connect` in flight.
    Authenticating,
    /// RPC `Connect` succeeded; the session may subscribe and send.
    Connected,
    /// Tearing down: close frame enqueued, RPC `Disconnect` ordered.
    Disconnecting,
    /// Terminal. Unregistered from the Hub, ping timer stopped.
    Closed,
}

struct SessionInner {
    uid: Uid,
    state: std::sync::Mutex<SessionState>,
    /// True only between a successful `Connect` and the first call to
    /// `disconnect`; `swap`-based consumption makes "enqueue RPC
    /// Disconnect at most once" race-free without a separate flag.
    connected: AtomicBool,
    closed: AtomicBool,
    env: std::sync::Mutex<SessionEnv>,
    identifiers: std::sync::Mutex<Option<String>>,
    subscriptions: std::sync::Mutex<HashSet<String>>,
    /// Streams grouped by the application-defined identifier that
    /// requested them, so a `stop_streams` response can remove exactly
    /// the streams belonging to one identifier (spec §4.4) without the
    /// Hub needing to know about identifiers at all.
    streams_by_identifier: std::sync::Mutex<HashMap<String, HashSet<String>>>,
    /// `None` once the queue has been closed by the overflow policy or by
    /// `close`; producers consult this instead of racing a nilled channel.
    outbound: std::sync::Mutex<Option<mpsc::Sender<Frame>>>,
    writer: AsyncMutex<WsWriter>,
    node: Weak<Node>,
}

/// A cloneable handle to one client connection.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("uid", &self.0.uid).finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.0.uid == other.0.uid
    }
}
impl Eq for Session {}

impl std::hash::Hash for Session {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.uid.hash(state);
    }
}

impl Session {
    /// Creates a new session in state `New`, owning the split WebSocket
    /// halves produced by [`crate::ws::accept`].
    pub(crate) fn new(env: SessionEnv, writer: WsWriter, node: Weak<Node>) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(constants::SESSION_QUEUE_CAPACITY);
        let inner = SessionInner {
            uid: Uid::new(),
            state: std::sync::Mutex::new(SessionState::New),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            env: std::sync::Mutex::new(env),
            identifiers: std::sync::Mutex::new(None),
            subscriptions: std::sync::Mutex::new(HashSet::new()),
            outbound: std::sync::Mutex::new(Some(tx)),
            streams_by_identifier: std::sync::Mutex::new(HashMap::new()),
            writer: AsyncMutex::new(writer),
            node,
        };
        (Self(Arc::new(inner)), rx)
    }

    /// This session's unique identifier.
    #[must_use]
    pub fn uid(&self) -> Uid {
        self.0.uid
    }

    /// True once the session has reached the terminal `Closed` state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// A snapshot of the streams this session is currently subscribed to.
    #[must_use]
    pub fn subscriptions(&self) -> HashSet<String> {
        self.0.subscriptions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub(crate) fn add_subscription(&self, stream: &str) {
        self.0
            .subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(stream.to_string());
    }

    pub(crate) fn remove_subscription(&self, stream: &str) {
        self.0
            .subscriptions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(stream);
    }

    /// Records that `stream` was added on behalf of `identifier`.
    pub(crate) fn add_stream_for_identifier(&self, identifier: &str, stream: &str) {
        self.0
            .streams_by_identifier
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(identifier.to_string())
            .or_default()
            .insert(stream.to_string());
    }

    /// Removes and returns every stream previously added for
    /// `identifier`, for a `stop_streams` response.
    pub(crate) fn take_streams_for_identifier(&self, identifier: &str) -> HashSet<String> {
        self.0
            .streams_by_identifier
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(identifier)
            .unwrap_or_default()
    }

    pub(crate) fn take_subscriptions(&self) -> HashSet<String> {
        std::mem::take(
            &mut self
                .0
                .subscriptions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// The RPC `Identifiers` token, if `Connect` has succeeded.
    #[must_use]
    pub fn identifiers(&self) -> Option<String> {
        self.0
            .identifiers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// A snapshot of the session's env (URL, headers, cstate).
    #[must_use]
    pub fn env(&self) -> SessionEnv {
        self.0.env.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.0.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.0.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Marks `Connect` as having succeeded: stores `identifiers` and
    /// transitions to `Connected`. Callers merge `cstate` separately via
    /// [`Session::merge_cstate`] as part of the common RPC response
    /// application.
    pub(crate) fn mark_connected(&self, identifiers: String) {
        *self.0.identifiers.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(identifiers);
        self.0.connected.store(true, Ordering::Release);
        self.set_state(SessionState::Connected);
    }

    /// Atomically replaces the session's `cstate` with `new_cstate`,
    /// matching the invariant that `cstate` updates from an RPC response
    /// are applied atomically with respect to other RPC calls.
    pub(crate) fn merge_cstate(&self, new_cstate: HashMap<String, String>) {
        if new_cstate.is_empty() {
            return;
        }
        self.0.env.lock().unwrap_or_else(std::sync::PoisonError::into_inner).cstate = new_cstate;
    }

    /// Enqueues a text frame for transmission. Never blocks; if the
    /// outbound queue is full, the session is disconnected with abnormal
    /// closure and this call still returns without error to the caller.
    pub fn send(&self, payload: impl Into<String>) {
        self.enqueue(Frame::text(payload));
    }

    fn enqueue(&self, frame: Frame) {
        let sender = {
            let guard = self.0.outbound.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.clone()
        };
        let Some(sender) = sender else { return };
        match sender.try_send(frame) {
            Ok(()) => {}
            Err(_overflow) => {
                self.close_outbound_queue();
                log::warn!(
                    "session {}: {}; disconnecting",
                    self.0.uid,
                    GatewayError::Capacity
                );
                let this = self.clone();
                tokio::spawn(async move {
                    this.disconnect("outbound queue overflow", close_code::ABNORMAL_CLOSURE).await;
                });
            }
        }
    }

    /// Closes the outbound queue so further producers silently no-op,
    /// without racing a concurrent `try_send` (the design's Open
    /// Question): the sender is replaced with `None` under the same
    /// mutex every producer reads through.
    fn close_outbound_queue(&self) {
        *self.0.outbound.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// Idempotently enqueues a close frame and stops the ping timer.
    /// Does not itself notify RPC — see [`Session::disconnect`].
    pub fn close(&self, reason: &str, code: u16) {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(SessionState::Disconnecting);
        self.enqueue(Frame::close(code, reason.to_string()));
    }

    /// Orders an RPC `Disconnect` if the session ever reached `Connected`,
    /// then calls [`Session::close`]. Idempotent with respect to whether
    /// the RPC fires: `connected` is consumed via `swap`, so only the
    /// first caller after a successful `Connect` triggers it.
    pub async fn disconnect(&self, reason: &str, code: u16) {
        if self.0.connected.swap(false, Ordering::AcqRel) {
            if let Some(node) = self.0.node.upgrade() {
                node.disconnect(self.clone()).await;
            }
        }
        self.close(reason, code);
    }

    /// Runs the write loop: drains the outbound queue, writing each frame
    /// under the write lock with a bounded deadline. Exits on write
    /// error, on delivering a `Close` frame, or once the queue is
    /// closed and drained. Finalizes the session on exit.
    pub(crate) async fn run_writer(&self, mut rx: mpsc::Receiver<Frame>) {
        while let Some(frame) = rx.recv().await {
            let is_close = frame.is_close();
            if let Err(err) = self.write_frame(&frame).await {
                log::warn!("session {} write failed: {err}; disconnecting", self.0.uid);
                self.disconnect("write failed", close_code::ABNORMAL_CLOSURE).await;
                break;
            }
            if is_close {
                break;
            }
        }
        self.finalize();
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), GatewayError> {
        let mut writer = self.0.writer.lock().await;
        let fut = async {
            match frame {
                Frame::Text { payload } => writer.send_text(payload).await,
                Frame::Close { code, reason } => writer.send_close(*code, reason).await,
            }
        };
        match tokio::time::timeout(constants::WRITE_DEADLINE, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::Transport(e.to_string())),
            Err(_elapsed) => Err(GatewayError::Transport("write deadline exceeded".to_string())),
        }
    }

    /// Runs the read loop: consumes client frames until the socket errs
    /// or the peer closes, dispatching each text frame to the Node.
    pub(crate) async fn run_reader(&self, mut reader: WsReader) {
        loop {
            match reader.recv().await {
                Some(Ok(crate::ws::WsMessage::Text(raw))) => {
                    if let Some(node) = self.0.node.upgrade() {
                        node.handle_command(self.clone(), &raw).await;
                    }
                }
                Some(Ok(crate::ws::WsMessage::Close { code, reason })) => {
                    if constants::EXPECTED_PEER_CLOSE_CODES.contains(&code) {
                        self.disconnect(&reason, close_code::NORMAL).await;
                    } else {
                        self.disconnect(&reason, close_code::ABNORMAL_CLOSURE).await;
                    }
                    break;
                }
                Some(Err(e)) => {
                    let err = GatewayError::Transport(e.to_string());
                    log::warn!("session {} read error: {err}", self.0.uid);
                    self.disconnect("read error", close_code::ABNORMAL_CLOSURE).await;
                    break;
                }
                None => {
                    self.disconnect("connection closed", close_code::ABNORMAL_CLOSURE).await;
                    break;
                }
            }
        }
    }

    /// Runs the ping timer: writes a JSON ping every `PING_INTERVAL`
    /// under the write lock, re-arming on success. On write failure,
    /// disconnects abnormally. Exits once `closed` is observed, checked
    /// immediately before each write so a rearm can never race past a
    /// concurrent close.
    pub(crate) async fn run_ping_timer(&self) {
        let mut interval = tokio::time::interval(constants::PING_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            if self.0.closed.load(Ordering::Acquire) {
                break;
            }
            let payload = serde_json::json!({
                "type": "ping",
                "message": chrono::Utc::now().timestamp(),
            })
            .to_string();
            let result = {
                let mut writer = self.0.writer.lock().await;
                tokio::time::timeout(constants::PING_WRITE_DEADLINE, writer.send_text(&payload)).await
            };
            match result {
                Ok(Ok(())) => {}
                _ => {
                    log::warn!("session {} ping failed; disconnecting", self.0.uid);
                    self.disconnect("Ping failed", close_code::ABNORMAL_CLOSURE).await;
                    break;
                }
            }
        }
    }

    /// Transitions to `Closed`, unregisters from the Hub, exactly once.
    fn finalize(&self) {
        self.0.closed.store(true, Ordering::Release);
        self.set_state(SessionState::Closed);
        if let Some(node) = self.0.node.upgrade() {
            node.finalize_session(self);
        }
    }

    /// Duration until the next ping, exposed for tests that want to
    /// avoid sleeping a full interval.
    #[must_use]
    pub fn ping_interval() -> Duration {
        constants::PING_INTERVAL
    }
}

/// Spins up a real loopback WebSocket handshake so other modules' tests can
/// exercise a genuine `Session` (Hub subscriptions, queue overflow, stream
/// bookkeeping) instead of a hand-rolled stand-in. Mirrors the handshake
/// `ws.rs`'s own tests perform; the client half is dropped once the server
/// half has its `WsWriter`, since these tests never read from the wire.
#[cfg(test)]
pub(crate) mod test_support {
    use super::{HashMap, Session, SessionEnv, Weak};
    use crate::frame::Frame;
    use crate::node::Node;
    use tokio::sync::mpsc;

    pub(crate) async fn spawn(node: Weak<Node>) -> (Session, mpsc::Receiver<Frame>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            crate::ws::accept(stream).await.unwrap()
        });
        let client = tokio::spawn(async move {
            tokio_tungstenite::connect_async(format!("ws://{addr}/cable"))
                .await
                .unwrap()
        });
        let (client_result, server_result) = tokio::join!(client, server);
        drop(client_result);
        let (writer, _reader, handshake) = server_result.unwrap();

        let env = SessionEnv {
            url: handshake.url,
            headers: handshake.headers,
            cstate: HashMap::new(),
        };
        Session::new(env, writer, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_display_matches_uuid() {
        let uid = Uid::new();
        assert_eq!(uid.to_string(), uid.0.to_string());
    }

    #[test]
    fn session_env_converts_into_rpc_env() {
        let env = SessionEnv {
            url: "/cable".into(),
            headers: HashMap::new(),
            cstate: [("k".to_string(), "v".to_string())].into_iter().collect(),
        };
        let rpc_env: crate::rpc::Env = env.into();
        assert_eq!(rpc_env.cstate.get("k"), Some(&"v".to_string()));
    }

    #[tokio::test]
    async fn outbound_queue_overflow_closes_session() {
        let (session, _rx) = test_support::spawn(Weak::new()).await;
        for i in 0..(constants::SESSION_QUEUE_CAPACITY + 8) {
            session.send(format!("msg-{i}"));
        }
        for _ in 0..100 {
            if session.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn stream_bookkeeping_tracks_streams_per_identifier() {
        let (session, _rx) = test_support::spawn(Weak::new()).await;
        session.add_stream_for_identifier("chat", "room:1");
        session.add_stream_for_identifier("chat", "room:2");
        session.add_stream_for_identifier("notifications", "alerts");

        let chat_streams = session.take_streams_for_identifier("chat");
        assert_eq!(chat_streams.len(), 2);
        assert!(chat_streams.contains("room:1"));
        assert!(chat_streams.contains("room:2"));

        // A second take for the same identifier finds nothing left; the
        // other identifier's stream is untouched.
        assert!(session.take_streams_for_identifier("chat").is_empty());
        assert_eq!(
            session.take_streams_for_identifier("notifications"),
            ["alerts".to_string()].into_iter().collect()
        );
    }
}
