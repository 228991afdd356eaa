//! Error types for the broker bridge.

use thiserror::Error;

/// Errors surfaced by bridge calls.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The command/response exchange exceeded the fixed timeout. The
    /// outcome at the broker is unknown: callers must not assume success
    /// or failure without a reconciliation pass.
    #[error("bridge timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Explicit broker-reported failure.
    #[error("broker rejected: {message}")]
    Rejected { message: String },

    /// Transport failure before a response arrived.
    #[error("bridge connection error: {0}")]
    Connection(String),

    /// The response could not be decoded.
    #[error("bridge protocol error: {0}")]
    Protocol(String),

    /// Ticket unknown to the terminal.
    #[error("ticket not found: {ticket}")]
    TicketNotFound { ticket: u64 },
}

impl BridgeError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// True when the caller may retry the exact same command.
    /// Timeouts are excluded: retrying a timed-out placement can double
    /// the position.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// True when the broker-side outcome is unknown.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
