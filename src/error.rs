//! Error taxonomy for the connection hub.
//!
//! Mirrors the error kinds in the design (transport, RPC, protocol,
//! capacity) as typed variants rather than panics. Fatal/startup failures
//! are handled at the binary boundary with `anyhow` instead (see
//! `main.rs`); they never appear here.

use thiserror::Error;

/// Errors produced by the connection hub's components.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Socket read/write failure. Local recovery is impossible; the
    /// session that produced this is torn down with abnormal closure.
    #[error("transport error: {0}")]
    Transport(String),

    /// RPC transport failure (the application server was unreachable, or
    /// the transport itself errored). Surfaced to callers as `status =
    /// ERROR`.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A client frame could not be parsed, or named an unknown command.
    /// Non-fatal: the session continues.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session's outbound queue overflowed its bounded capacity.
    #[error("outbound queue capacity exceeded")]
    Capacity,
}
