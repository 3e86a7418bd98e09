//! Application-wide constants for the connection hub.
//!
//! Centralizes timing and sizing constants named in the design so they are
//! not scattered as magic numbers across `session.rs`, `hub.rs`, and
//! `disconnect_queue.rs`.

use std::time::Duration;

/// How often a session's ping timer fires and writes a ping frame.
pub const PING_INTERVAL: Duration = Duration::from_secs(3);

/// Deadline for a single ping write. Half the ping interval, so a slow
/// write is detected well before the next ping would be due.
pub const PING_WRITE_DEADLINE: Duration = Duration::from_millis(1500);

/// Deadline for a single outbound frame write (text, close, or ping).
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Capacity of a session's bounded outbound frame queue.
pub const SESSION_QUEUE_CAPACITY: usize = 256;

/// Default DisconnectQueue drain rate, in RPC `Disconnect` calls per second.
pub const DEFAULT_DISCONNECT_RATE: f64 = 50.0;

/// Default deadline for `Shutdown` to drain the DisconnectQueue.
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// WebSocket close codes used by the gateway (RFC 6455 §7.4.1).
pub mod close_code {
    /// Normal closure: the purpose for which the connection was
    /// established has been fulfilled.
    pub const NORMAL: u16 = 1000;
    /// Going away: the server is shutting down or the client is
    /// navigating away.
    pub const GOING_AWAY: u16 = 1001;
    /// No status code was present in the frame.
    pub const NO_STATUS: u16 = 1005;
    /// Abnormal closure: the connection was lost without a close frame.
    pub const ABNORMAL_CLOSURE: u16 = 1006;
    /// Internal server error.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Close codes a peer is expected to send for a clean shutdown.
pub const EXPECTED_PEER_CLOSE_CODES: [u16; 3] = [
    close_code::NORMAL,
    close_code::GOING_AWAY,
    close_code::NO_STATUS,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_write_deadline_is_half_ping_interval() {
        assert_eq!(PING_WRITE_DEADLINE, PING_INTERVAL / 2);
    }

    #[test]
    fn expected_peer_close_codes_cover_normal_and_going_away() {
        assert!(EXPECTED_PEER_CLOSE_CODES.contains(&close_code::NORMAL));
        assert!(EXPECTED_PEER_CLOSE_CODES.contains(&close_code::GOING_AWAY));
        assert!(!EXPECTED_PEER_CLOSE_CODES.contains(&close_code::ABNORMAL_CLOSURE));
    }
}
