//! Cloneable handle over the pipeline queue.
//!
//! The ingestion collaborator and the admin/snapshot surfaces talk to the
//! orchestrator exclusively through this handle. Submissions enqueue an
//! event with a oneshot responder and await the terminal ack, so callers
//! see the real outcome (queued, invalid, blocked, executed, error) while
//! events still process strictly in arrival order.

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use sigpilot_core::events::{PipelineEvent, SubmitAck};
use sigpilot_core::settings::{RiskSettings, StealthSettings};
use sigpilot_core::table::OrderTable;
use sigpilot_core::types::TradingOrder;

use crate::status::SystemStatus;

#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineEvent>,
    status_rx: watch::Receiver<SystemStatus>,
    table: OrderTable,
}

impl PipelineHandle {
    #[must_use]
    pub(crate) fn new(
        tx: mpsc::Sender<PipelineEvent>,
        status_rx: watch::Receiver<SystemStatus>,
        table: OrderTable,
    ) -> Self {
        Self {
            tx,
            status_rx,
            table,
        }
    }

    /// Submits one raw message to the pipeline and awaits its outcome.
    ///
    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn submit(
        &self,
        raw_text: &str,
        provider_id: &str,
        channel_id: &str,
        message_id: Option<&str>,
    ) -> Result<SubmitAck> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(PipelineEvent::NewSignal {
                raw_text: raw_text.to_string(),
                provider_id: provider_id.to_string(),
                channel_id: channel_id.to_string(),
                message_id: message_id.map(str::to_string),
                respond_to: Some(ack_tx),
            })
            .await
            .context("pipeline queue closed")?;
        ack_rx.await.context("pipeline dropped the request")
    }

    /// Submits an edit of a previously submitted message.
    ///
    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn submit_edit(
        &self,
        raw_text: &str,
        original_message_id: &str,
        provider_id: &str,
        channel_id: &str,
    ) -> Result<SubmitAck> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(PipelineEvent::SignalEdit {
                raw_text: raw_text.to_string(),
                original_message_id: original_message_id.to_string(),
                provider_id: provider_id.to_string(),
                channel_id: channel_id.to_string(),
                respond_to: Some(ack_tx),
            })
            .await
            .context("pipeline queue closed")?;
        ack_rx.await.context("pipeline dropped the request")
    }

    /// Applies a provider command to the provider's open orders.
    ///
    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn apply_command(
        &self,
        command_text: &str,
        provider_id: &str,
        signal_id: Option<Uuid>,
    ) -> Result<SubmitAck> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(PipelineEvent::ProviderCommand {
                command_text: command_text.to_string(),
                provider_id: provider_id.to_string(),
                signal_id,
                respond_to: Some(ack_tx),
            })
            .await
            .context("pipeline queue closed")?;
        ack_rx.await.context("pipeline dropped the request")
    }

    /// Re-runs a signal text through the full pipeline, outside any chat
    /// channel.
    ///
    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn replay_signal(&self, raw_text: &str, provider_id: &str) -> Result<SubmitAck> {
        self.submit(raw_text, provider_id, "replay", None).await
    }

    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn manual_close_order(&self, order_id: Uuid) -> Result<SubmitAck> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(PipelineEvent::ManualClose {
                order_id,
                respond_to: Some(ack_tx),
            })
            .await
            .context("pipeline queue closed")?;
        ack_rx.await.context("pipeline dropped the request")
    }

    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn update_risk_settings(&self, settings: RiskSettings) -> Result<()> {
        self.tx
            .send(PipelineEvent::UpdateRiskSettings(Box::new(settings)))
            .await
            .context("pipeline queue closed")
    }

    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn update_stealth_settings(&self, settings: StealthSettings) -> Result<()> {
        self.tx
            .send(PipelineEvent::UpdateStealthSettings(Box::new(settings)))
            .await
            .context("pipeline queue closed")
    }

    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn emergency_close_all(&self) -> Result<()> {
        self.tx
            .send(PipelineEvent::EmergencyCloseAll)
            .await
            .context("pipeline queue closed")
    }

    /// # Errors
    ///
    /// Fails when the orchestrator has shut down.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(PipelineEvent::Shutdown)
            .await
            .context("pipeline queue closed")
    }

    /// Latest published status snapshot.
    #[must_use]
    pub fn system_status(&self) -> SystemStatus {
        self.status_rx.borrow().clone()
    }

    /// Read-only order summaries, optionally filtered by provider.
    pub async fn active_orders(&self, provider_id: Option<&str>) -> Vec<TradingOrder> {
        let orders = self.table.active().await;
        match provider_id {
            Some(provider) => orders
                .into_iter()
                .filter(|o| o.provider_id == provider)
                .collect(),
            None => orders,
        }
    }
}
