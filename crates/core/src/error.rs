//! Pipeline error taxonomy.
//!
//! Every failure a signal can hit between ingestion and the broker has a
//! variant here, so nothing fails silently and each terminal outcome stays
//! distinguishable by status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Insufficient fields to act on; never propagated past the parser.
    #[error("signal invalid: {reason}")]
    ParseInvalid { reason: String },

    /// First failing risk layer, with its human-readable reason.
    #[error("risk rejected: {reason}")]
    RiskRejected { reason: String },

    /// The bridge exchange timed out. Ambiguous outcome: the order may
    /// still exist at the broker, so callers must not assume success or
    /// failure without reconciliation.
    #[error("bridge timeout after {timeout_secs}s")]
    BridgeTimeout { timeout_secs: u64 },

    /// Broker-reported failure; the order was not placed.
    #[error("bridge error: {message}")]
    BridgeFailed { message: String },

    /// Provider command text matched no rule.
    #[error("unknown command: {text}")]
    CommandUnmatched { text: String },

    /// Order id not present in the live-order table.
    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: uuid::Uuid },

    /// Disallowed status transition attempted.
    #[error("invalid transition {from:?} -> {to:?} for order {order_id}")]
    InvalidTransition {
        order_id: uuid::Uuid,
        from: crate::types::OrderStatus,
        to: crate::types::OrderStatus,
    },
}

impl PipelineError {
    pub fn parse_invalid(reason: impl Into<String>) -> Self {
        Self::ParseInvalid {
            reason: reason.into(),
        }
    }

    pub fn risk_rejected(reason: impl Into<String>) -> Self {
        Self::RiskRejected {
            reason: reason.into(),
        }
    }

    /// True when the broker-side outcome is unknown and a reconciliation
    /// pass is required.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self, Self::BridgeTimeout { .. })
    }
}
