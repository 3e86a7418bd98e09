//! Node — orchestrator wiring Session ↔ RPC ↔ Hub, and owner of shutdown.
//!
//! The only process-wide singleton (design §9): initialized at startup,
//! torn down via an explicit `shutdown(deadline)` that returns once every
//! session has been closed and the DisconnectQueue has drained or the
//! deadline has elapsed. Sessions hold only a `Weak<Node>` back-reference
//! (see `session.rs`), so Node is the sole strong owner of the session set
//! and drives every session's destruction — never the reverse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::command::{Command, CommandKind};
use crate::config::Config;
use crate::constants::close_code;
use crate::disconnect_queue::DisconnectQueue;
use crate::error::GatewayError;
use crate::hub::Hub;
use crate::rpc::{self, RpcClient, Status};
use crate::session::{Session, SessionEnv, Uid};
use crate::ws::{HandshakeInfo, WsWriter};

/// The gateway's process-wide orchestrator.
pub struct Node {
    hub: Hub,
    disconnect_queue: DisconnectQueue,
    rpc: RpcClient,
    sessions: Mutex<HashMap<Uid, Session>>,
    accepting: AtomicBool,
    self_weak: Mutex<Weak<Node>>,
    /// Lower-cased request header names to copy into `SessionEnv.headers`;
    /// everything else the handshake captured is dropped (spec §6, §10.3).
    forwarded_headers: Vec<String>,
}

impl Node {
    /// Builds a new Node, returns it already wrapped in `Arc`, and spawns
    /// the DisconnectQueue's rate-limited drain worker against it.
    ///
    /// Every Session and the DisconnectQueue hold only a non-owning
    /// `Weak<Node>` back-reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC client cannot be constructed.
    pub fn new(config: &Config) -> anyhow::Result<Arc<Self>> {
        let rpc = RpcClient::new(config.rpc_addr.clone(), config.rpc_timeout)?;
        let forwarded_headers = config
            .forwarded_headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        let node = Arc::new_cyclic(|weak| Self {
            hub: Hub::new(),
            disconnect_queue: DisconnectQueue::new(config.disconnect_rate, weak.clone()),
            rpc,
            sessions: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            self_weak: Mutex::new(weak.clone()),
            forwarded_headers,
        });
        let worker = Arc::clone(&node);
        tokio::spawn(async move { worker.disconnect_queue.run().await });
        Ok(node)
    }

    /// The subscription index, for direct broadcast delivery from the
    /// pub/sub subscriber loop.
    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// False once `shutdown` has begun; callers accepting new TCP
    /// connections should stop doing so.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Number of sessions currently tracked by the Node.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    fn weak_self(&self) -> Weak<Node> {
        self.self_weak.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Accepts one upgraded WebSocket connection: builds its `Session`,
    /// registers it, spawns its writer immediately (so transmissions and
    /// a close frame can flow even if `Connect` fails), then runs
    /// `Authenticate`. On success, spawns the reader and ping tasks too.
    pub async fn accept_session(
        self: &Arc<Self>,
        writer: WsWriter,
        reader: crate::ws::WsReader,
        handshake: HandshakeInfo,
    ) {
        let headers = handshake
            .headers
            .into_iter()
            .filter(|(name, _)| self.forwarded_headers.iter().any(|h| h == name))
            .collect();
        let env = SessionEnv {
            url: handshake.url,
            headers,
            cstate: HashMap::new(),
        };
        let (session, outbound_rx) = Session::new(env, writer, self.weak_self());
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(session.uid(), session.clone());

        let writer_session = session.clone();
        tokio::spawn(async move { writer_session.run_writer(outbound_rx).await });

        if self.authenticate(&session).await {
            let reader_session = session.clone();
            tokio::spawn(async move { reader_session.run_reader(reader).await });
            let ping_session = session.clone();
            tokio::spawn(async move { ping_session.run_ping_timer().await });
        }
    }

    /// Calls RPC `Connect` and applies its response. Returns `true` if
    /// the session is now `Connected` and should start its reader/ping
    /// tasks.
    async fn authenticate(&self, session: &Session) -> bool {
        let response = self.rpc.connect(session.env().into()).await;
        match response.status {
            Status::Success => {
                if let Some(env) = response.env {
                    session.merge_cstate(env.cstate);
                }
                session.mark_connected(response.identifiers.unwrap_or_default());
                for transmission in response.transmissions {
                    session.send(transmission);
                }
                true
            }
            Status::Failure => {
                for transmission in response.transmissions {
                    session.send(transmission);
                }
                session.close("unauthorized", close_code::NORMAL);
                false
            }
            Status::Error => {
                log::error!(
                    "RPC Connect errored: {}",
                    response.error_msg.unwrap_or_default()
                );
                session.close("internal error", close_code::INTERNAL_ERROR);
                false
            }
        }
    }

    /// Parses a raw client frame as a command envelope and dispatches it
    /// to RPC `Command`, then applies the response.
    pub async fn handle_command(&self, session: Session, raw: &str) {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(e) => {
                let err = GatewayError::Protocol(e.to_string());
                log::warn!("session {} sent an unparsable frame: {err}", session.uid());
                return;
            }
        };
        let Some(identifiers) = session.identifiers() else {
            log::warn!(
                "session {} sent a command before Connect completed; ignoring",
                session.uid()
            );
            return;
        };

        let req = rpc::CommandRequest {
            command: command_name(command.command).to_string(),
            identifier: command.identifier.clone(),
            connection_identifiers: identifiers,
            data: command.data,
            env: session.env().into(),
        };
        let response = self.rpc.command(req).await;
        self.apply_command_response(&session, &command.identifier, response)
            .await;
    }

    async fn apply_command_response(
        &self,
        session: &Session,
        identifier: &str,
        response: rpc::CommandResponse,
    ) {
        if let Some(env) = response.env {
            session.merge_cstate(env.cstate);
        }
        let errored = response.status == Status::Error;
        if errored {
            log::error!(
                "RPC Command errored for session {}: {}",
                session.uid(),
                response.error_msg.unwrap_or_default()
            );
        }
        for transmission in response.transmissions {
            session.send(transmission);
        }
        // An errored response carries no trustworthy stream/disconnect
        // instructions; close the session instead of acting on them.
        if errored {
            session
                .disconnect("internal error", close_code::ABNORMAL_CLOSURE)
                .await;
            return;
        }
        if response.stop_streams {
            for stream in session.take_streams_for_identifier(identifier) {
                self.hub.unsubscribe(session, &stream);
            }
        }
        for stream in response.streams {
            self.hub.subscribe(session, &stream);
            session.add_stream_for_identifier(identifier, &stream);
        }
        if response.disconnect {
            session
                .disconnect("disconnect requested", close_code::NORMAL)
                .await;
        }
    }

    /// Enqueues `session` in the DisconnectQueue for a rate-limited RPC
    /// `Disconnect` notification.
    pub async fn disconnect(&self, session: Session) {
        self.disconnect_queue.enqueue(session);
    }

    /// Performs RPC `Disconnect` immediately, bypassing the queue. Used
    /// both by the DisconnectQueue worker and by synchronous shutdown
    /// drain.
    pub async fn disconnect_now(&self, session: &Session) {
        let req = rpc::DisconnectRequest {
            identifiers: session.identifiers().unwrap_or_default(),
            subscriptions: session.subscriptions().into_iter().collect(),
            env: session.env().into(),
        };
        let response = self.rpc.disconnect(req).await;
        if response.status == Status::Error {
            log::error!(
                "RPC Disconnect errored for session {}: {}",
                session.uid(),
                response.error_msg.unwrap_or_default()
            );
        }
    }

    /// Delegates a pub/sub delivery to the Hub.
    pub fn broadcast(&self, stream: &str, payload: &str) {
        self.hub.broadcast(stream, payload);
    }

    /// Unregisters a session from the Hub and the Node's session table.
    /// Called exactly once, from `Session::finalize` on the transition to
    /// `Closed`.
    pub(crate) fn finalize_session(&self, session: &Session) {
        self.hub.unsubscribe_all(session);
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&session.uid());
    }

    /// Stops accepting new sessions, closes every current session with
    /// going-away (ordering an RPC `Disconnect` for each that ever
    /// reached `Connected`), then drains the DisconnectQueue under the
    /// remaining deadline.
    pub async fn shutdown(&self, deadline: Duration) {
        self.accepting.store(false, Ordering::Release);
        let started = tokio::time::Instant::now();
        let sessions: Vec<Session> = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for session in sessions {
            session
                .disconnect("server shutting down", close_code::GOING_AWAY)
                .await;
        }
        let remaining = deadline.saturating_sub(started.elapsed());
        self.disconnect_queue.shutdown(remaining).await;
    }
}

fn command_name(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Subscribe => "subscribe",
        CommandKind::Unsubscribe => "unsubscribe",
        CommandKind::Message => "message",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn test_config() -> Config {
        Config {
            rpc_addr: "http://127.0.0.1:1".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn new_node_starts_accepting_with_no_sessions() {
        let node = Node::new(&test_config()).unwrap();
        assert!(node.is_accepting());
        assert_eq!(node.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let node = Node::new(&test_config()).unwrap();
        node.shutdown(Duration::from_millis(50)).await;
        assert!(!node.is_accepting());
    }

    /// A minimal HTTP/1.1 server that replies to every request with a
    /// canned JSON body selected by request path, standing in for the
    /// application server in the RPC facade's `reqwest` calls.
    async fn mock_rpc_server(responses: Vec<(&'static str, &'static str)>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let responses = responses.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = stream.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    let body = responses
                        .iter()
                        .find(|(p, _)| *p == path)
                        .map(|(_, b)| *b)
                        .unwrap_or("{}");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    /// End-to-end connect → subscribe → broadcast scenario (spec §8):
    /// a session authenticates via RPC `Connect`, subscribes to a stream
    /// via RPC `Command`, and then receives a broadcast published on that
    /// stream.
    #[tokio::test]
    async fn connect_subscribe_and_broadcast_scenario() {
        let rpc_addr = mock_rpc_server(vec![
            (
                "/connect",
                r#"{"status":1,"identifiers":"user-1","transmissions":["welcome"]}"#,
            ),
            (
                "/command",
                r#"{"status":1,"disconnect":false,"stop_streams":false,"streams":["room:1"],"transmissions":[]}"#,
            ),
        ])
        .await;
        let node = Node::new(&Config {
            rpc_addr,
            ..Config::default()
        })
        .unwrap();

        let (session, mut rx) = crate::session::test_support::spawn(node.weak_self()).await;
        assert!(node.authenticate(&session).await);
        assert_eq!(session.state(), crate::session::SessionState::Connected);
        // The Connect response's transmission was delivered.
        match rx.recv().await.unwrap() {
            Frame::Text { payload } => assert_eq!(payload, "welcome"),
            Frame::Close { .. } => panic!("expected a text frame"),
        }

        node.handle_command(session.clone(), r#"{"command":"subscribe","identifier":"chat"}"#)
            .await;
        assert!(session.subscriptions().contains("room:1"));

        node.broadcast("room:1", "hi there");
        match rx.recv().await.unwrap() {
            Frame::Text { payload } => assert_eq!(payload, "hi there"),
            Frame::Close { .. } => panic!("expected a text frame"),
        }
    }
}
