//! Configuration loading.
//!
//! A plain, `serde`-deserializable config file (`config.json`) with CLI
//! flag overrides, matching the teacher's `Config::load` pattern: defaults
//! baked into a `Default` impl, a JSON file on disk, and explicit
//! overrides layered on top at the binary boundary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DISCONNECT_RATE, DEFAULT_SHUTDOWN_DEADLINE};

/// TLS material for the gateway's listener. TLS termination itself is an
/// external collaborator (spec §1); the gateway only reads this config
/// and hands it to whatever listener wraps the raw `TcpStream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain.
    pub cert_path: PathBuf,
    /// Path to the PEM private key.
    pub key_path: PathBuf,
}

/// Pub/sub backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// Address of the pub/sub backend.
    pub addr: String,
    /// Streams to pre-subscribe to at startup, in addition to whatever
    /// streams sessions register dynamically as the Hub observes them.
    #[serde(default)]
    pub streams: Vec<String>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            addr: "redis://127.0.0.1:6379".to_string(),
            streams: Vec::new(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host/port the gateway listens on.
    pub bind_addr: SocketAddr,
    /// TLS material, or `None` to serve plaintext `ws://`.
    pub tls: Option<TlsConfig>,
    /// Request header names copied into RPC `env.headers`.
    pub forwarded_headers: Vec<String>,
    /// Application server RPC target.
    pub rpc_addr: String,
    /// Per-RPC-call timeout.
    #[serde(with = "duration_secs")]
    pub rpc_timeout: Duration,
    /// Pub/sub backend configuration.
    pub pubsub: PubSubConfig,
    /// DisconnectQueue drain rate, in RPC `Disconnect` calls per second.
    pub disconnect_rate: f64,
    /// Deadline for `Node::shutdown` to drain the DisconnectQueue.
    #[serde(with = "duration_secs")]
    pub shutdown_deadline: Duration,
    /// Optional Prometheus text-exposition listener address. Metrics
    /// exposure is an external collaborator (spec §1); when set, the
    /// gateway only binds the listener, it does not define metric names
    /// beyond counters already implied by this design (session_count,
    /// stream_count).
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid default bind addr"),
            tls: None,
            forwarded_headers: vec!["cookie".to_string(), "x-forwarded-for".to_string()],
            rpc_addr: "http://127.0.0.1:50051".to_string(),
            rpc_timeout: Duration::from_secs(5),
            pubsub: PubSubConfig::default(),
            disconnect_rate: DEFAULT_DISCONNECT_RATE,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults for any
    /// field the file does not set (via `#[serde(default)]`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// The platform config directory's `cable-gateway/config.json`, used as
/// `--config`'s default when no override is given.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("cable-gateway").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// CLI flags. File-sourced config (`--config`) is loaded first; any flag
/// explicitly passed overrides the corresponding field.
#[derive(Debug, Parser)]
#[command(name = "cable-gateway", about = "ActionCable-compatible WebSocket gateway")]
pub struct Args {
    /// Path to a JSON config file.
    #[arg(long, default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Override `bind_addr`.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Override `rpc_addr`.
    #[arg(long)]
    pub rpc_addr: Option<String>,
}

impl Args {
    /// Loads config from `self.config`, then applies any CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)?;
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(rpc_addr) = &self.rpc_addr {
            config.rpc_addr = rpc_addr.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bind_addr, config.bind_addr);
        assert_eq!(back.disconnect_rate, config.disconnect_rate);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = std::path::Path::new("/nonexistent/config.json");
        let config = Config::load(path).unwrap();
        assert_eq!(config.bind_addr, Config::default().bind_addr);
    }

    #[test]
    fn load_parses_partial_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"rpc_addr":"http://example.com:9000"}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.rpc_addr, "http://example.com:9000");
        assert_eq!(config.disconnect_rate, Config::default().disconnect_rate);
    }
}
