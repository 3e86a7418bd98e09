//! Shared WebSocket transport (server role).
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves, adapted from the client-side transport used
//! elsewhere in the corpus. A single [`accept`] function performs the
//! upgrade handshake, capturing the request URL and headers needed to
//! build a [`crate::session::SessionEnv`], and returns a ([`WsWriter`],
//! [`WsReader`]) pair ready for use in a reader task / writer task split.

use std::collections::HashMap;

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

type WsStream = WebSocketStream<TcpStream>;

/// Received WebSocket message, trimmed to the cases the read loop cares
/// about (raw tungstenite `Frame` variants are never surfaced).
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of an accepted WebSocket connection.
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

impl WsWriter {
    /// Sends a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Sends a close frame with the given code and reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = tungstenite::protocol::CloseFrame {
            code: tungstenite::protocol::frame::coding::CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flushes pending writes and closes the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of an accepted WebSocket connection.
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl WsReader {
    /// Receives the next message, returning `None` when the stream ends.
    ///
    /// Ping/Pong frames are answered transparently by the underlying
    /// `tokio-tungstenite` stream and never surfaced here; raw `Frame`
    /// variants are skipped.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => {
                    continue;
                }
                Some(Ok(Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// The URL path and headers observed during the upgrade handshake,
/// captured for [`crate::session::SessionEnv`].
#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    /// The request path (and query string) the client upgraded on.
    pub url: String,
    /// Every request header, lower-cased by name.
    pub headers: HashMap<String, String>,
}

/// Accepts a WebSocket upgrade on an already-accepted TCP stream.
///
/// TLS termination happens upstream of this function (see spec §1); the
/// `TcpStream` here may already be wrapped by a TLS acceptor before the
/// handshake reaches this crate in a production deployment, but since TLS
/// is an external collaborator this function only deals in plain streams
/// for its own tests.
///
/// # Errors
///
/// Returns an error if the handshake fails.
pub async fn accept(stream: TcpStream) -> Result<(WsWriter, WsReader, HandshakeInfo)> {
    let info = std::sync::Mutex::new(HandshakeInfo::default());
    let callback = |req: &Request, resp: Response| {
        let mut info = info.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        info.url = req.uri().to_string();
        info.headers = req
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        Ok(resp)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .context("WebSocket accept handshake failed")?;

    let handshake_info = info
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }, handshake_info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_handshake_captures_url_and_headers() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept(stream).await
        });

        let client = tokio::spawn(async move {
            let url = format!("ws://{addr}/cable?token=abc");
            tokio_tungstenite::connect_async(url).await
        });

        let (client_result, server_result) = tokio::join!(client, server);
        client_result.unwrap().unwrap();
        let (_, _, info) = server_result.unwrap().unwrap();
        assert!(info.url.contains("/cable"));
        assert!(info.headers.contains_key("host"));
    }
}
