//! Connection-hub library for the cable gateway.
//!
//! A WebSocket gateway that terminates many long-lived client connections
//! and delegates authentication, subscription authorization, and command
//! handling to an external application server over a synchronous RPC
//! channel. Broadcasts arriving from a pub/sub backend are fanned out to
//! the subset of connected sessions subscribed to each stream.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────┐
//!              │     Node     │  orchestrator: owns Hub + Sessions + shutdown
//!              └──────┬───────┘
//!          ┌───────────┼───────────┐
//!          ▼           ▼           ▼
//!     ┌────────┐  ┌─────────┐  ┌──────────────────┐
//!     │ Session│  │   Hub   │  │ DisconnectQueue   │
//!     │ (×N)   │  │ (index) │  │ (rate-limited)    │
//!     └───┬────┘  └────┬────┘  └─────────┬─────────┘
//!         │            │                 │
//!         ▼            ▼                 ▼
//!   client socket  pub/sub feed      RPC facade (app server)
//! ```
//!
//! Out of scope (external collaborators): the WebSocket framing library
//! (`tokio-tungstenite`), the pub/sub transport, the RPC transport, TLS
//! termination, CLI/config parsing, metrics exposure, and the optional
//! embedded scripting runtime for custom message formatting.

pub mod command;
pub mod config;
pub mod constants;
pub mod disconnect_queue;
pub mod error;
pub mod frame;
pub mod hub;
pub mod node;
pub mod pubsub;
pub mod rpc;
pub mod session;
pub mod ws;

pub use config::Config;
pub use error::GatewayError;
pub use hub::Hub;
pub use node::Node;
pub use session::{Session, SessionEnv, Uid};
