//! Client command envelope.
//!
//! Client frames are JSON envelopes of the form used by the popular
//! real-time convention this gateway speaks: `{command, identifier,
//! data}`, where `command` selects `subscribe`, `unsubscribe`, or
//! `message`.

use serde::{Deserialize, Serialize};

/// The client-chosen command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Subscribe to an application-defined identifier.
    Subscribe,
    /// Unsubscribe from an application-defined identifier.
    Unsubscribe,
    /// Send an application-defined message on an identifier.
    Message,
}

/// A parsed client command envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    /// Which operation the client is requesting.
    pub command: CommandKind,
    /// Opaque channel identifier string, distinct from a pub/sub stream.
    pub identifier: String,
    /// Payload for `message` commands; absent for `subscribe`/`unsubscribe`.
    #[serde(default)]
    pub data: Option<String>,
}

impl Command {
    /// Parses a raw client text frame as a command envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not valid JSON or is missing required
    /// fields. This is a protocol error (kind 3): the caller should log it
    /// and keep the session open rather than propagate it further.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_command() {
        let cmd = Command::parse(r#"{"command":"subscribe","identifier":"ch1"}"#).unwrap();
        assert_eq!(cmd.command, CommandKind::Subscribe);
        assert_eq!(cmd.identifier, "ch1");
        assert!(cmd.data.is_none());
    }

    #[test]
    fn parses_message_command_with_data() {
        let cmd =
            Command::parse(r#"{"command":"message","identifier":"ch1","data":"hi"}"#).unwrap();
        assert_eq!(cmd.command, CommandKind::Message);
        assert_eq!(cmd.data.as_deref(), Some("hi"));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Command::parse(r#"{"command":"frobnicate","identifier":"x"}"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Command::parse("not json").is_err());
    }
}
