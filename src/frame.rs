//! Outbound frame representation.
//!
//! A closed tagged variant dispatched by tag rather than polymorphism
//! (per the design's preference for a concrete enum over a trait object
//! for the two outbound shapes a session ever needs to write).

/// A frame queued for a session's writer.
///
/// A `Close` frame is terminal: once the writer sees one, it delivers it
/// and exits without consuming anything enqueued after it.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A UTF-8 text frame forwarded verbatim to the client.
    Text {
        /// The frame payload.
        payload: String,
    },
    /// A close frame.
    Close {
        /// WebSocket close code (see `constants::close_code`).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

impl Frame {
    /// Builds a text frame from any `Into<String>` payload.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::Text {
            payload: payload.into(),
        }
    }

    /// Builds a close frame.
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close {
            code,
            reason: reason.into(),
        }
    }

    /// True if this frame is a close frame.
    #[must_use]
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }
}
