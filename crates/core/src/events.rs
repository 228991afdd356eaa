//! Events carried by the orchestrator's queue and the acks returned to the
//! ingestion layer.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::settings::{RiskSettings, StealthSettings};

/// Inbound work for the orchestrator. Produced by the ingestion collaborator
/// (signals) and by administrative surfaces (the rest).
#[derive(Debug)]
pub enum PipelineEvent {
    NewSignal {
        raw_text: String,
        provider_id: String,
        channel_id: String,
        message_id: Option<String>,
        respond_to: Option<oneshot::Sender<SubmitAck>>,
    },
    SignalEdit {
        raw_text: String,
        original_message_id: String,
        provider_id: String,
        channel_id: String,
        respond_to: Option<oneshot::Sender<SubmitAck>>,
    },
    ProviderCommand {
        command_text: String,
        provider_id: String,
        signal_id: Option<Uuid>,
        respond_to: Option<oneshot::Sender<SubmitAck>>,
    },
    UpdateRiskSettings(Box<RiskSettings>),
    UpdateStealthSettings(Box<StealthSettings>),
    ManualClose {
        order_id: Uuid,
        respond_to: Option<oneshot::Sender<SubmitAck>>,
    },
    EmergencyCloseAll,
    Shutdown,
}

/// Terminal outcome of one submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStatus {
    /// Accepted; an order is pending placement or a monitor took over.
    Queued,
    /// Parser could not produce an actionable signal.
    Invalid,
    /// Risk gate rejected the signal.
    Blocked,
    /// An order was placed and confirmed by the bridge.
    Executed,
    /// Pipeline-level failure (bridge error, internal error).
    Error,
}

/// Result returned to the ingestion layer for each submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAck {
    pub status: SubmitStatus,
    pub signal_id: Option<Uuid>,
    /// Reason for Blocked/Invalid/Error outcomes.
    pub message: Option<String>,
}

impl SubmitAck {
    #[must_use]
    pub fn queued(signal_id: Uuid) -> Self {
        Self {
            status: SubmitStatus::Queued,
            signal_id: Some(signal_id),
            message: None,
        }
    }

    #[must_use]
    pub fn executed(signal_id: Uuid) -> Self {
        Self {
            status: SubmitStatus::Executed,
            signal_id: Some(signal_id),
            message: None,
        }
    }

    #[must_use]
    pub fn invalid(signal_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            status: SubmitStatus::Invalid,
            signal_id,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn blocked(signal_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            status: SubmitStatus::Blocked,
            signal_id: Some(signal_id),
            message: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn error(signal_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            status: SubmitStatus::Error,
            signal_id,
            message: Some(message.into()),
        }
    }
}
