//! RPC client facade — synchronous request/response to the application
//! server.
//!
//! Exposes `connect`, `command`, and `disconnect`, matching the three RPC
//! methods in the design. Callers observe one of `Status::Success`,
//! `Status::Failure`, or `Status::Error`, or a transport error (mapped to
//! `Status::Error` by this facade, never propagated as a panic).
//!
//! The underlying transport is a blocking `reqwest::blocking::Client`
//! wrapped in `tokio::task::spawn_blocking`, the same "blocking client
//! used from async code" shape the corpus uses for its own Rails API
//! client. Connection pooling and retries are delegated to `reqwest`
//! itself; this facade performs no retries.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Outcome of an RPC call, shared across all three methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The call failed for reasons the application server considers an
    /// internal error (kind 2 distinction: FAILURE is not this).
    Error = 0,
    /// The call succeeded.
    Success = 1,
    /// The call was rejected by application logic (e.g. bad credentials,
    /// unauthorized subscription). Not a gateway error.
    Failure = 2,
}

/// The URL, forwarded headers, and connection-scoped state passed on
/// every RPC call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Env {
    /// The original upgrade request URL.
    pub url: String,
    /// Forwarded request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Opaque connection state the application may read and update.
    #[serde(default)]
    pub cstate: HashMap<String, String>,
}

/// Request payload for the `Connect` RPC method.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectRequest {
    /// The connecting session's env.
    pub env: Env,
}

/// Response payload for the `Connect` RPC method.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectResponse {
    /// Call outcome.
    pub status: Status,
    /// Opaque authorization token for the session, present on success.
    #[serde(default)]
    pub identifiers: Option<String>,
    /// Server-to-client payloads to forward verbatim, in order.
    #[serde(default)]
    pub transmissions: Vec<String>,
    /// Human-readable error detail, present on failure/error.
    #[serde(default)]
    pub error_msg: Option<String>,
    /// Updated env (in particular `cstate`), merged into the session.
    #[serde(default)]
    pub env: Option<Env>,
}

/// Request payload for the `Command` RPC method.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    /// `subscribe`, `unsubscribe`, or `message`.
    pub command: String,
    /// The application-defined channel identifier.
    pub identifier: String,
    /// The session's RPC identifiers token, as returned by `Connect`.
    pub connection_identifiers: String,
    /// Payload for `message` commands.
    #[serde(default)]
    pub data: Option<String>,
    /// The session's env.
    pub env: Env,
}

/// Response payload for the `Command` RPC method.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    /// Call outcome.
    pub status: Status,
    /// If true, the session should be disconnected after this response is
    /// applied.
    #[serde(default)]
    pub disconnect: bool,
    /// If true, all existing subscriptions for this `identifier` are
    /// removed before `streams` is applied.
    #[serde(default)]
    pub stop_streams: bool,
    /// Streams to add to the Hub for this session.
    #[serde(default)]
    pub streams: Vec<String>,
    /// Server-to-client payloads to forward verbatim, in order.
    #[serde(default)]
    pub transmissions: Vec<String>,
    /// Human-readable error detail.
    #[serde(default)]
    pub error_msg: Option<String>,
    /// Updated env.
    #[serde(default)]
    pub env: Option<Env>,
}

/// Request payload for the `Disconnect` RPC method.
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectRequest {
    /// The session's RPC identifiers token.
    pub identifiers: String,
    /// The session's subscriptions at the time of disconnect.
    pub subscriptions: Vec<String>,
    /// The session's env.
    pub env: Env,
}

/// Response payload for the `Disconnect` RPC method.
#[derive(Debug, Clone, Deserialize)]
pub struct DisconnectResponse {
    /// Call outcome.
    pub status: Status,
    /// Human-readable error detail.
    #[serde(default)]
    pub error_msg: Option<String>,
}

/// Synchronous request/response client for the application server's RPC
/// endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl RpcClient {
    /// Builds a new facade targeting `base_url` (e.g.
    /// `http://localhost:50051`), with the given per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Calls the `Connect` RPC method.
    pub async fn connect(&self, env: Env) -> ConnectResponse {
        let this = self.clone();
        let req = ConnectRequest { env };
        match tokio::task::spawn_blocking(move || this.post("/connect", &req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                log::error!("RPC connect failed: {e}");
                ConnectResponse {
                    status: Status::Error,
                    identifiers: None,
                    transmissions: Vec::new(),
                    error_msg: Some(e.to_string()),
                    env: None,
                }
            }
            Err(join_err) => {
                log::error!("RPC connect task panicked: {join_err}");
                ConnectResponse {
                    status: Status::Error,
                    identifiers: None,
                    transmissions: Vec::new(),
                    error_msg: Some(join_err.to_string()),
                    env: None,
                }
            }
        }
    }

    /// Calls the `Command` RPC method.
    pub async fn command(&self, req: CommandRequest) -> CommandResponse {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.post("/command", &req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                log::error!("RPC command failed: {e}");
                CommandResponse {
                    status: Status::Error,
                    disconnect: false,
                    stop_streams: false,
                    streams: Vec::new(),
                    transmissions: Vec::new(),
                    error_msg: Some(e.to_string()),
                    env: None,
                }
            }
            Err(join_err) => {
                log::error!("RPC command task panicked: {join_err}");
                CommandResponse {
                    status: Status::Error,
                    disconnect: false,
                    stop_streams: false,
                    streams: Vec::new(),
                    transmissions: Vec::new(),
                    error_msg: Some(join_err.to_string()),
                    env: None,
                }
            }
        }
    }

    /// Calls the `Disconnect` RPC method.
    pub async fn disconnect(&self, req: DisconnectRequest) -> DisconnectResponse {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.post("/disconnect", &req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                log::error!("RPC disconnect failed: {e}");
                DisconnectResponse {
                    status: Status::Error,
                    error_msg: Some(e.to_string()),
                }
            }
            Err(join_err) => {
                log::error!("RPC disconnect task panicked: {join_err}");
                DisconnectResponse {
                    status: Status::Error,
                    error_msg: Some(join_err.to_string()),
                }
            }
        }
    }

    fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .post(&url)
            .json(body)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| GatewayError::Rpc(e.to_string()))?
            .json::<Resp>()
            .map_err(|e| GatewayError::Rpc(e.to_string()))
    }
}

// `serde_repr`-style manual impls would normally come from the
// `serde_repr` crate; to avoid adding a dependency the teacher's corpus
// doesn't otherwise need, `Status` is encoded/decoded as a small integer
// by hand below instead of via derive macros.
mod status_serde {
    use super::Status;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for Status {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u8(*self as u8)
        }
    }

    impl<'de> Deserialize<'de> for Status {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let value = u8::deserialize(deserializer)?;
            match value {
                0 => Ok(Status::Error),
                1 => Ok(Status::Success),
                2 => Ok(Status::Failure),
                other => Err(serde::de::Error::custom(format!(
                    "unknown RPC status: {other}"
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_json() {
        for status in [Status::Error, Status::Success, Status::Failure] {
            let json = serde_json::to_string(&status).unwrap();
            let back: Status = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
    }

    #[test]
    fn connect_response_deserializes_minimal() {
        let resp: ConnectResponse = serde_json::from_str(
            r#"{"status":1,"identifiers":"abc","transmissions":["welcome"]}"#,
        )
        .unwrap();
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.identifiers.as_deref(), Some("abc"));
        assert_eq!(resp.transmissions, vec!["welcome".to_string()]);
    }
}
