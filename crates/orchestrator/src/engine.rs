//! The orchestrator: one event loop draining the pipeline queue.
//!
//! Each `NewSignal` runs Parser → Risk Gate → Stealth → Builder/Executor in
//! sequence; any rejection short-circuits with a recorded reason and no
//! order is built. Pipeline failures are caught here and converted into an
//! error ack so one malformed signal never stops the loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sigpilot_bridge::Bridge;
use sigpilot_commands::CommandInterpreter;
use sigpilot_core::config::AppConfig;
use sigpilot_core::events::{PipelineEvent, SubmitAck};
use sigpilot_core::table::OrderTable;
use sigpilot_core::types::{AccountState, OrderStatus, ParsedSignal, SignalType, TradeRecord};
use sigpilot_execution::{build_order, DispatchPlan, ExecutionOutcome, Executor};
use sigpilot_parser::SignalParser;
use sigpilot_risk::{GateDecision, NewsGate, RiskGate};
use sigpilot_stealth::{clone_detection_report, CloneRisk, StealthEngine};

use crate::handle::PipelineHandle;
use crate::status::{PipelineStats, SystemStatus};

/// Trades kept for the clone-detection diagnostic.
const TRADE_HISTORY_LEN: usize = 100;

pub struct Orchestrator {
    config: AppConfig,
    parser: SignalParser,
    gate: RiskGate,
    stealth: StealthEngine,
    executor: Executor,
    interpreter: CommandInterpreter,
    table: OrderTable,
    bridge: Arc<dyn Bridge>,
    account: Arc<RwLock<AccountState>>,
    stats: PipelineStats,
    trade_history: VecDeque<TradeRecord>,
    /// First-parse signal id per (provider, message), so edits can find the
    /// orders their original message produced.
    signal_origins: HashMap<(String, String), Uuid>,
    rx: mpsc::Receiver<PipelineEvent>,
    status_tx: watch::Sender<SystemStatus>,
}

impl Orchestrator {
    /// Wires the pipeline together and returns the orchestrator plus the
    /// handle the ingestion and admin surfaces use.
    #[must_use]
    pub fn new(config: AppConfig, bridge: Arc<dyn Bridge>) -> (Self, PipelineHandle) {
        Self::with_news_gate(config, bridge, None)
    }

    #[must_use]
    pub fn with_news_gate(
        config: AppConfig,
        bridge: Arc<dyn Bridge>,
        news: Option<Arc<dyn NewsGate>>,
    ) -> (Self, PipelineHandle) {
        let table = OrderTable::new();
        let executor = Executor::new(bridge.clone(), table.clone(), config.execution.clone());
        let interpreter =
            CommandInterpreter::new(table.clone(), bridge.clone(), config.execution.clone());
        let mut gate = RiskGate::new(config.risk.clone());
        if let Some(news) = news {
            gate = gate.with_news_gate(news);
        }

        let (tx, rx) = mpsc::channel(config.orchestrator.queue_capacity);
        let (status_tx, status_rx) = watch::channel(SystemStatus::default());
        let handle = PipelineHandle::new(tx, status_rx, table.clone());

        let orchestrator = Self {
            stealth: StealthEngine::new(config.stealth.clone()),
            parser: SignalParser::new(),
            gate,
            executor,
            interpreter,
            table,
            bridge,
            account: Arc::new(RwLock::new(AccountState::default())),
            stats: PipelineStats::default(),
            trade_history: VecDeque::with_capacity(TRADE_HISTORY_LEN),
            signal_origins: HashMap::new(),
            rx,
            status_tx,
            config,
        };
        (orchestrator, handle)
    }

    /// Runs the queue loop plus the periodic account refresh and stats
    /// rollup until `Shutdown` arrives or every handle is dropped.
    pub async fn run(mut self) {
        info!("Orchestrator started");
        let refresh_task = spawn_account_refresh(
            self.bridge.clone(),
            self.account.clone(),
            self.config.orchestrator.account_refresh_secs,
        );

        let mut rollup = tokio::time::interval(std::time::Duration::from_secs(
            self.config.orchestrator.stats_rollup_secs,
        ));

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(PipelineEvent::Shutdown) | None => break,
                        Some(event) => self.handle_event(event).await,
                    }
                }
                _ = rollup.tick() => {
                    self.publish_status().await;
                }
            }
        }

        refresh_task.abort();
        info!("Orchestrator stopped");
    }

    async fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::NewSignal {
                raw_text,
                provider_id,
                channel_id,
                message_id,
                respond_to,
            } => {
                debug!(provider_id, channel_id, "New signal event");
                let ack = self
                    .handle_new_signal(&raw_text, &provider_id, message_id.as_deref())
                    .await;
                respond(respond_to, ack);
            }
            PipelineEvent::SignalEdit {
                raw_text,
                original_message_id,
                provider_id,
                channel_id,
                respond_to,
            } => {
                debug!(provider_id, channel_id, "Signal edit event");
                let ack = self
                    .handle_edit(&raw_text, &original_message_id, &provider_id)
                    .await;
                respond(respond_to, ack);
            }
            PipelineEvent::ProviderCommand {
                command_text,
                provider_id,
                signal_id,
                respond_to,
            } => {
                let ack = self
                    .handle_command(&command_text, &provider_id, signal_id)
                    .await;
                respond(respond_to, ack);
            }
            PipelineEvent::UpdateRiskSettings(settings) => {
                info!("Risk settings updated");
                self.gate.update_settings(*settings);
            }
            PipelineEvent::UpdateStealthSettings(settings) => {
                info!("Stealth settings updated");
                self.stealth.update_settings(*settings);
            }
            PipelineEvent::ManualClose {
                order_id,
                respond_to,
            } => {
                let ack = self.manual_close(order_id).await;
                respond(respond_to, ack);
            }
            PipelineEvent::EmergencyCloseAll => {
                match self.bridge.emergency_close_all().await {
                    Ok(count) => {
                        warn!(closed = count, "Emergency close-all executed");
                        for order in self.table.active().await {
                            let target = if order.status == OrderStatus::Pending {
                                OrderStatus::Cancelled
                            } else {
                                OrderStatus::Closed
                            };
                            if let Err(e) = self.table.transition(order.id, target).await {
                                debug!(order_id = %order.id, error = %e, "Close-all transition");
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Emergency close-all failed"),
                }
                self.publish_status().await;
            }
            PipelineEvent::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Parser → Risk Gate → Stealth → Builder/Executor.
    async fn handle_new_signal(
        &mut self,
        raw_text: &str,
        provider_id: &str,
        message_id: Option<&str>,
    ) -> SubmitAck {
        let signal = self.parser.parse(raw_text, provider_id, message_id);
        let signal_id = signal.signal_id;

        // Command-shaped messages act on existing orders instead of
        // creating new ones.
        if matches!(
            signal.signal_type,
            SignalType::Command | SignalType::Closure | SignalType::Modification
        ) {
            return self.handle_command(raw_text, provider_id, None).await;
        }

        if !signal.is_actionable() {
            self.stats.invalid += 1;
            return SubmitAck::invalid(Some(signal_id), "missing pair or action");
        }

        let account = self.account_snapshot().await;
        let now = Utc::now();
        let (lot, clamped) = match self.gate.evaluate(&signal, &account, now).await {
            GateDecision::Rejected { reason } => {
                self.stats.record_blocked(provider_id);
                return SubmitAck::blocked(signal_id, reason);
            }
            GateDecision::Approved { lot_size, clamped } => (lot_size, clamped),
        };
        if clamped {
            debug!(signal_id = %signal_id, lot = %lot, "Lot clamped by provider cap");
        }

        let mut approved = signal;
        approved.lot_size = Some(lot);
        let pair = approved.pair.clone().unwrap_or_default();
        let pair_exposure = self.table.pair_exposure(&pair).await;
        let plan = self.stealth.transform(
            approved,
            pair_exposure,
            &self.config.execution,
            &mut rand::thread_rng(),
        );

        let final_lot = plan.signal.lot_size.unwrap_or(lot);
        let comment = (!plan.strip_comment).then(|| format!("sig:{provider_id}"));
        let magic = plan.magic_override.or_else(|| Some(provider_magic(provider_id)));
        let order = build_order(&plan.signal, final_lot, comment, magic);

        let outcome = self
            .executor
            .dispatch(
                order,
                DispatchPlan {
                    execution_delay: plan.execution_delay,
                    sltp_delay: plan.sltp_delay,
                },
            )
            .await;

        if let Some(message_id) = message_id {
            if !matches!(outcome, ExecutionOutcome::Failed { .. }) {
                self.signal_origins
                    .insert((provider_id.to_string(), message_id.to_string()), signal_id);
            }
        }

        match outcome {
            ExecutionOutcome::Executed { .. } => {
                self.gate.commit_trade(provider_id, &pair, final_lot, now);
                self.stats.record_executed(provider_id);
                self.record_trade(&plan.signal, final_lot);
                self.maybe_dispatch_decoy(&plan.signal).await;
                self.publish_status().await;
                SubmitAck::executed(signal_id)
            }
            ExecutionOutcome::QueuedSmartEntry { .. } | ExecutionOutcome::PendingPlaced { .. } => {
                self.gate.commit_trade(provider_id, &pair, final_lot, now);
                self.publish_status().await;
                SubmitAck::queued(signal_id)
            }
            ExecutionOutcome::Failed { reason, .. } => {
                self.gate.release(provider_id, &pair, final_lot);
                self.stats.errors += 1;
                SubmitAck::error(Some(signal_id), reason)
            }
        }
    }

    /// Re-parse, diff, log. Changed SL/TP values are pushed to the live
    /// orders only when edit application is switched on.
    async fn handle_edit(
        &mut self,
        raw_text: &str,
        original_message_id: &str,
        provider_id: &str,
    ) -> SubmitAck {
        let signal = self
            .parser
            .parse_edit(raw_text, original_message_id, provider_id);
        self.stats.edits_seen += 1;

        if signal.field_changes.is_empty() {
            debug!(
                provider_id,
                message_id = original_message_id,
                "Edit with no field changes"
            );
            return SubmitAck::queued(signal.signal_id);
        }
        info!(
            provider_id,
            message_id = original_message_id,
            changes = ?signal.field_changes,
            "Signal edit detected"
        );

        if !self.config.execution.apply_edits {
            return SubmitAck::queued(signal.signal_id);
        }

        let origin = self
            .signal_origins
            .get(&(provider_id.to_string(), original_message_id.to_string()))
            .copied();
        let Some(origin_id) = origin else {
            debug!(message_id = original_message_id, "Edit for message with no orders");
            return SubmitAck::queued(signal.signal_id);
        };

        let sl_changed = signal.field_changes.iter().any(|c| c.field == "stop_loss");
        let tp_changed = signal
            .field_changes
            .iter()
            .any(|c| c.field == "take_profits");
        let new_sl = sl_changed.then_some(signal.stop_loss).flatten();
        let new_tp = tp_changed
            .then(|| signal.take_profits.first().copied())
            .flatten();
        if new_sl.is_none() && new_tp.is_none() {
            return SubmitAck::queued(signal.signal_id);
        }

        for order in self.table.orders_for_signal(origin_id).await {
            let Some(ticket) = order.broker_ticket else {
                continue;
            };
            match self.bridge.modify_order(ticket, new_sl, new_tp).await {
                Ok(()) => {
                    self.table
                        .update(order.id, |o| {
                            if let Some(sl) = new_sl {
                                o.stop_loss = Some(sl);
                            }
                            if let Some(tp) = new_tp {
                                if let Some(level) = o.take_profit_levels.first_mut() {
                                    level.price = tp;
                                }
                            }
                        })
                        .await;
                    if let Err(e) = self.table.transition(order.id, OrderStatus::Modified).await {
                        debug!(order_id = %order.id, error = %e, "Edit transition");
                    }
                    info!(order_id = %order.id, "Edit applied to live order");
                }
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Edit modification failed");
                }
            }
        }
        SubmitAck::queued(signal.signal_id)
    }

    async fn handle_command(
        &mut self,
        command_text: &str,
        provider_id: &str,
        signal_id: Option<Uuid>,
    ) -> SubmitAck {
        match self.interpreter.apply(command_text, provider_id, signal_id).await {
            Ok(result) => {
                self.stats.commands += 1;
                for order_id in result.start_trailing {
                    sigpilot_execution::monitors::spawn_trailing(self.executor.clone(), order_id);
                }
                self.publish_status().await;
                SubmitAck {
                    status: sigpilot_core::events::SubmitStatus::Queued,
                    signal_id,
                    message: Some(format!(
                        "command applied to {} order(s)",
                        result.affected
                    )),
                }
            }
            Err(e) => {
                self.stats.errors += 1;
                SubmitAck::error(signal_id, e.to_string())
            }
        }
    }

    async fn manual_close(&mut self, order_id: Uuid) -> SubmitAck {
        let Some(order) = self.table.get(order_id).await else {
            return SubmitAck::error(None, format!("order not found: {order_id}"));
        };

        if order.status == OrderStatus::Pending {
            if let Some(ticket) = order.broker_ticket {
                if let Err(e) = self.bridge.cancel_order(ticket).await {
                    return SubmitAck::error(Some(order.signal_id), e.to_string());
                }
            }
            if let Err(e) = self.table.transition(order_id, OrderStatus::Cancelled).await {
                return SubmitAck::error(Some(order.signal_id), e.to_string());
            }
        } else if order.status.is_live() {
            let Some(ticket) = order.broker_ticket else {
                return SubmitAck::error(Some(order.signal_id), "order has no broker ticket");
            };
            if let Err(e) = self.bridge.close_order(ticket).await {
                return SubmitAck::error(Some(order.signal_id), e.to_string());
            }
            for sub in &order.sub_tickets {
                if let Err(e) = self.bridge.close_order(*sub).await {
                    warn!(order_id = %order_id, ticket = sub, error = %e, "Leg close failed");
                }
            }
            if let Err(e) = self.table.transition(order_id, OrderStatus::Closed).await {
                return SubmitAck::error(Some(order.signal_id), e.to_string());
            }
        } else {
            return SubmitAck::error(Some(order.signal_id), "order already terminal");
        }

        info!(order_id = %order_id, "Manual close completed");
        self.publish_status().await;
        SubmitAck::executed(order.signal_id)
    }

    /// Every N real trades the stealth engine asks for a decoy: a small
    /// opposite order on another pair, outside the risk ledger.
    async fn maybe_dispatch_decoy(&mut self, real: &ParsedSignal) {
        if !self.stealth.register_real_trade() {
            return;
        }
        let decoy = self.stealth.build_decoy(real, &mut rand::thread_rng());
        let lot = decoy.lot_size.unwrap_or(self.config.execution.min_lot);
        let order = build_order(&decoy, lot, None, Some(rand::random::<u32>() % 900_000 + 100_000));
        info!(pair = order.pair, "Dispatching decoy order");
        match self.executor.dispatch(order, DispatchPlan::default()).await {
            ExecutionOutcome::Executed { .. } => self.stats.decoys += 1,
            outcome => warn!(?outcome, "Decoy dispatch did not execute"),
        }
    }

    fn record_trade(&mut self, signal: &ParsedSignal, lot: rust_decimal::Decimal) {
        let Some(action) = signal.action else { return };
        if self.trade_history.len() >= TRADE_HISTORY_LEN {
            self.trade_history.pop_front();
        }
        self.trade_history.push_back(TradeRecord {
            pair: signal.pair.clone().unwrap_or_default(),
            action,
            lot_size: lot,
            executed_at: Utc::now(),
        });
    }

    /// Account metrics from the refresh task plus a live view of open
    /// orders from the table.
    async fn account_snapshot(&self) -> AccountState {
        let mut account = self.account.read().await.clone();
        account.open_orders = self.table.briefs().await;
        account
    }

    async fn publish_status(&self) {
        let history: Vec<TradeRecord> = self.trade_history.iter().cloned().collect();
        let report = clone_detection_report(&history);
        let status = SystemStatus {
            active_orders: self.table.active_count().await,
            stats: self.stats.clone(),
            emergency_stop: self.gate.settings().emergency_stop,
            clone_risk: match report.risk {
                CloneRisk::Low => "low".to_string(),
                CloneRisk::Medium => "medium".to_string(),
                CloneRisk::High => "high".to_string(),
            },
            account_equity: self.account.read().await.equity,
            last_update: Some(Utc::now()),
        };
        let _ = self.status_tx.send(status);
    }
}

fn respond(respond_to: Option<tokio::sync::oneshot::Sender<SubmitAck>>, ack: SubmitAck) {
    if let Some(tx) = respond_to {
        let _ = tx.send(ack);
    }
}

/// Stable magic-number tag per provider, so broker-side positions group by
/// source even with stealth masking off.
fn provider_magic(provider_id: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in provider_id.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    100_000 + hash % 900_000
}

/// Polls the bridge for balance/equity and feeds the risk gate's view.
fn spawn_account_refresh(
    bridge: Arc<dyn Bridge>,
    account: Arc<RwLock<AccountState>>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            ticks.tick().await;
            match bridge.account_info().await {
                Ok(info) => {
                    let mut guard = account.write().await;
                    guard.balance = info.balance;
                    guard.equity = info.equity;
                    guard.margin_level = info.margin_level;
                    guard.daily_pnl = info.daily_pnl;
                    guard.daily_trades = info.daily_trades;
                    guard.updated_at = Some(Utc::now());
                }
                Err(e) => {
                    warn!(error = %e, "Account refresh failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_magic_is_stable_and_in_range() {
        let a = provider_magic("alpha");
        let b = provider_magic("alpha");
        let c = provider_magic("beta");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!((100_000..1_000_000).contains(&a));
    }
}
