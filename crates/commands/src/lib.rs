//! Provider command interpretation.
//!
//! Operators steer a provider's open orders with short free-text commands
//! ("close 50%", "be", "sl to 1.0830"). The rule list is priority-ordered
//! and text matching no rule is an explicit error, never a silent no-op.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use sigpilot_bridge::Bridge;
use sigpilot_core::error::PipelineError;
use sigpilot_core::settings::ExecutionSettings;
use sigpilot_core::table::OrderTable;
use sigpilot_core::types::{OrderStatus, TradingOrder};

/// A recognized provider command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderCommand {
    /// Close this percentage of every matching order's current lot.
    ClosePercent(f64),
    CloseAll,
    /// Replace the first take-profit on every matching order.
    SetTakeProfit(Decimal),
    /// Replace the stop-loss on every matching order.
    SetStopLoss(Decimal),
    /// Move the stop-loss to each order's own entry price.
    BreakEven,
    /// Enable the trailing-stop monitor retroactively.
    EnableTrailing,
    /// Cancel matching pending orders only.
    CancelPending,
}

/// Result of applying one command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: ProviderCommand,
    /// Orders the command was applied to.
    pub affected: usize,
    /// Orders the caller should start trailing monitors for.
    pub start_trailing: Vec<Uuid>,
    /// Per-order failures; the command still applies to the rest.
    pub errors: Vec<String>,
}

static CLOSE_PCT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*close\s+(\d+(?:\.\d+)?)\s*%").expect("close-percent pattern")
});
static CLOSE_HALF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*close\s+half\s*$").expect("close-half pattern"));
// Catch-all close; percentage and "half" forms are tried first. The word
// boundary keeps past-tense chatter ("closed +50 pips") from matching.
static CLOSE_ALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*close\b").expect("close-all pattern"));
static TP_TO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btp\s+(?:to\s+)?(\d+(?:\.\d+)?)").expect("tp-to pattern")
});
static SL_TO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsl\s+(?:to\s+)?(\d+(?:\.\d+)?)").expect("sl-to pattern")
});
static BREAK_EVEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbreak\s*even\b|^\s*be\s*$").expect("break-even pattern")
});
static TRAILING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btrailing\b").expect("trailing pattern"));
static CANCEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:cancel|delete)\b").expect("cancel pattern"));

/// Matches command text against the fixed, priority-ordered rule list.
#[must_use]
pub fn interpret(text: &str) -> Option<ProviderCommand> {
    if let Some(caps) = CLOSE_PCT_RE.captures(text) {
        let pct: f64 = caps[1].parse().ok()?;
        if pct > 0.0 && pct < 100.0 {
            return Some(ProviderCommand::ClosePercent(pct));
        }
        return Some(ProviderCommand::CloseAll);
    }
    if CLOSE_HALF_RE.is_match(text) {
        return Some(ProviderCommand::ClosePercent(50.0));
    }
    if CLOSE_ALL_RE.is_match(text) {
        return Some(ProviderCommand::CloseAll);
    }
    if let Some(caps) = TP_TO_RE.captures(text) {
        return caps[1].parse().ok().map(ProviderCommand::SetTakeProfit);
    }
    if let Some(caps) = SL_TO_RE.captures(text) {
        return caps[1].parse().ok().map(ProviderCommand::SetStopLoss);
    }
    if BREAK_EVEN_RE.is_match(text) {
        return Some(ProviderCommand::BreakEven);
    }
    if TRAILING_RE.is_match(text) {
        return Some(ProviderCommand::EnableTrailing);
    }
    if CANCEL_RE.is_match(text) {
        return Some(ProviderCommand::CancelPending);
    }
    None
}

pub struct CommandInterpreter {
    table: OrderTable,
    bridge: std::sync::Arc<dyn Bridge>,
    settings: ExecutionSettings,
}

impl CommandInterpreter {
    #[must_use]
    pub fn new(
        table: OrderTable,
        bridge: std::sync::Arc<dyn Bridge>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            table,
            bridge,
            settings,
        }
    }

    /// Resolves the provider's order set and applies the command to it.
    ///
    /// # Errors
    ///
    /// `CommandUnmatched` when the text matches no rule.
    pub async fn apply(
        &self,
        command_text: &str,
        provider_id: &str,
        signal_id: Option<Uuid>,
    ) -> Result<CommandResult, PipelineError> {
        let command = interpret(command_text).ok_or_else(|| PipelineError::CommandUnmatched {
            text: command_text.to_string(),
        })?;

        let targets = self.table.orders_for_provider(provider_id, signal_id).await;
        info!(
            provider_id,
            ?command,
            targets = targets.len(),
            "Applying provider command"
        );

        let mut result = CommandResult {
            command,
            affected: 0,
            start_trailing: Vec::new(),
            errors: Vec::new(),
        };

        for order in targets {
            let applied = match command {
                ProviderCommand::ClosePercent(pct) => self.close_percent(&order, pct).await,
                ProviderCommand::CloseAll => self.close_all(&order).await,
                ProviderCommand::SetTakeProfit(price) => {
                    self.modify(&order, None, Some(price)).await
                }
                ProviderCommand::SetStopLoss(price) => self.modify(&order, Some(price), None).await,
                ProviderCommand::BreakEven => match order.entry_price {
                    Some(entry) => self.modify(&order, Some(entry), None).await,
                    None => Ok(false),
                },
                ProviderCommand::EnableTrailing => {
                    if order.status.is_live() {
                        result.start_trailing.push(order.id);
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
                ProviderCommand::CancelPending => self.cancel_pending(&order).await,
            };

            match applied {
                Ok(true) => result.affected += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Command failed for order");
                    result.errors.push(format!("{}: {e}", order.id));
                }
            }
        }

        Ok(result)
    }

    async fn close_percent(
        &self,
        order: &TradingOrder,
        pct: f64,
    ) -> Result<bool, PipelineError> {
        if !order.status.is_live() {
            return Ok(false);
        }
        let Some(ticket) = order.broker_ticket else {
            return Ok(false);
        };

        let fraction = Decimal::try_from(pct / 100.0).unwrap_or(Decimal::ZERO);
        let mut close_lot = round_to_step(order.lot_size * fraction, self.settings.lot_step);
        if close_lot <= Decimal::ZERO {
            return Ok(false);
        }
        if close_lot >= order.lot_size {
            close_lot = order.lot_size - self.settings.lot_step;
            if close_lot <= Decimal::ZERO {
                return Ok(false);
            }
        }

        self.bridge
            .close_partial(ticket, close_lot)
            .await
            .map_err(to_pipeline_error)?;
        self.table
            .update(order.id, |o| o.lot_size -= close_lot)
            .await;
        self.table
            .transition(order.id, OrderStatus::PartiallyClosed)
            .await?;
        Ok(true)
    }

    async fn close_all(&self, order: &TradingOrder) -> Result<bool, PipelineError> {
        if !order.status.is_live() {
            return Ok(false);
        }
        let Some(ticket) = order.broker_ticket else {
            return Ok(false);
        };

        self.bridge
            .close_order(ticket)
            .await
            .map_err(to_pipeline_error)?;
        for sub in &order.sub_tickets {
            if let Err(e) = self.bridge.close_order(*sub).await {
                warn!(order_id = %order.id, ticket = sub, error = %e, "Leg close failed");
            }
        }
        self.table.transition(order.id, OrderStatus::Closed).await?;
        Ok(true)
    }

    async fn modify(
        &self,
        order: &TradingOrder,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<bool, PipelineError> {
        if !order.status.is_live() {
            return Ok(false);
        }
        let Some(ticket) = order.broker_ticket else {
            return Ok(false);
        };

        self.bridge
            .modify_order(ticket, stop_loss, take_profit)
            .await
            .map_err(to_pipeline_error)?;
        self.table
            .update(order.id, |o| {
                if let Some(sl) = stop_loss {
                    o.stop_loss = Some(sl);
                }
                if let Some(tp) = take_profit {
                    if let Some(level) = o.take_profit_levels.first_mut() {
                        level.price = tp;
                    }
                }
            })
            .await;
        self.table.transition(order.id, OrderStatus::Modified).await?;
        Ok(true)
    }

    async fn cancel_pending(&self, order: &TradingOrder) -> Result<bool, PipelineError> {
        if order.status != OrderStatus::Pending {
            return Ok(false);
        }
        if let Some(ticket) = order.broker_ticket {
            self.bridge
                .cancel_order(ticket)
                .await
                .map_err(to_pipeline_error)?;
        }
        self.table.transition(order.id, OrderStatus::Cancelled).await?;
        Ok(true)
    }
}

fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).round() * step
}

fn to_pipeline_error(err: sigpilot_bridge::BridgeError) -> PipelineError {
    if err.is_ambiguous() {
        PipelineError::BridgeTimeout { timeout_secs: 10 }
    } else {
        PipelineError::BridgeFailed {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sigpilot_bridge::{PaperBridge, PlaceOrderRequest};
    use sigpilot_core::types::{OrderType, TakeProfitLevel};
    use std::sync::Arc;

    #[test]
    fn rule_list_matches_in_priority_order() {
        assert_eq!(interpret("close 50%"), Some(ProviderCommand::ClosePercent(50.0)));
        assert_eq!(interpret("Close 25 %"), Some(ProviderCommand::ClosePercent(25.0)));
        assert_eq!(interpret("close half"), Some(ProviderCommand::ClosePercent(50.0)));
        assert_eq!(interpret("close all"), Some(ProviderCommand::CloseAll));
        assert_eq!(interpret("close"), Some(ProviderCommand::CloseAll));
        assert_eq!(
            interpret("tp to 1.0950"),
            Some(ProviderCommand::SetTakeProfit(dec!(1.0950)))
        );
        assert_eq!(
            interpret("sl to 1.0830"),
            Some(ProviderCommand::SetStopLoss(dec!(1.0830)))
        );
        assert_eq!(interpret("break even"), Some(ProviderCommand::BreakEven));
        assert_eq!(interpret("be"), Some(ProviderCommand::BreakEven));
        assert_eq!(interpret("trailing"), Some(ProviderCommand::EnableTrailing));
        assert_eq!(interpret("cancel"), Some(ProviderCommand::CancelPending));
        assert_eq!(interpret("hold the line"), None);
    }

    async fn executed_order(
        table: &OrderTable,
        bridge: &Arc<PaperBridge>,
        provider: &str,
        lot: Decimal,
    ) -> Uuid {
        let ticket = bridge
            .place_order(PlaceOrderRequest {
                symbol: "EURUSD".to_string(),
                order_type: OrderType::Buy,
                lot_size: lot,
                entry_price: Some(dec!(1.0850)),
                stop_loss: Some(dec!(1.0820)),
                take_profit: Some(dec!(1.0900)),
                comment: None,
                magic: None,
            })
            .await
            .unwrap();

        let order = TradingOrder {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            pair: "EURUSD".to_string(),
            order_type: OrderType::Buy,
            lot_size: lot,
            entry_price: Some(dec!(1.0850)),
            stop_loss: Some(dec!(1.0820)),
            take_profit_levels: vec![TakeProfitLevel {
                level: 1,
                price: dec!(1.0900),
                lot_percentage: 100.0,
                sl_move_on_hit: None,
            }],
            broker_ticket: Some(ticket),
            sub_tickets: Vec::new(),
            status: OrderStatus::Executed,
            provider_id: provider.to_string(),
            comment: None,
            magic_number: None,
            created_at: Utc::now(),
            executed_at: Some(Utc::now()),
        };
        let id = order.id;
        table.insert(order).await;
        id
    }

    fn setup() -> (OrderTable, Arc<PaperBridge>, CommandInterpreter) {
        let table = OrderTable::new();
        let bridge = Arc::new(PaperBridge::new());
        let interpreter = CommandInterpreter::new(
            table.clone(),
            bridge.clone(),
            ExecutionSettings::default(),
        );
        (table, bridge, interpreter)
    }

    #[tokio::test]
    async fn close_fifty_percent_halves_each_order() {
        let (table, bridge, interpreter) = setup();
        let a = executed_order(&table, &bridge, "alpha", dec!(0.20)).await;
        let b = executed_order(&table, &bridge, "alpha", dec!(0.10)).await;

        let result = interpreter.apply("close 50%", "alpha", None).await.unwrap();
        assert_eq!(result.affected, 2);
        assert!(result.errors.is_empty());

        let a = table.get(a).await.unwrap();
        let b = table.get(b).await.unwrap();
        assert_eq!(a.lot_size, dec!(0.10));
        assert_eq!(b.lot_size, dec!(0.05));
        assert_eq!(a.status, OrderStatus::PartiallyClosed);
        assert_eq!(b.status, OrderStatus::PartiallyClosed);
    }

    #[tokio::test]
    async fn close_all_is_terminal_and_scoped_to_provider() {
        let (table, bridge, interpreter) = setup();
        let a = executed_order(&table, &bridge, "alpha", dec!(0.20)).await;
        let other = executed_order(&table, &bridge, "beta", dec!(0.10)).await;

        let result = interpreter.apply("close all", "alpha", None).await.unwrap();
        assert_eq!(result.affected, 1);
        assert_eq!(table.get(a).await.unwrap().status, OrderStatus::Closed);
        assert_eq!(table.get(other).await.unwrap().status, OrderStatus::Executed);
    }

    #[tokio::test]
    async fn break_even_moves_stop_to_each_entry() {
        let (table, bridge, interpreter) = setup();
        let a = executed_order(&table, &bridge, "alpha", dec!(0.20)).await;

        let result = interpreter.apply("be", "alpha", None).await.unwrap();
        assert_eq!(result.affected, 1);
        let order = table.get(a).await.unwrap();
        assert_eq!(order.stop_loss, Some(dec!(1.0850)));
        assert_eq!(order.status, OrderStatus::Modified);
    }

    #[tokio::test]
    async fn sl_to_replaces_stop_on_all_matching() {
        let (table, bridge, interpreter) = setup();
        let a = executed_order(&table, &bridge, "alpha", dec!(0.20)).await;

        interpreter.apply("sl to 1.0840", "alpha", None).await.unwrap();
        assert_eq!(table.get(a).await.unwrap().stop_loss, Some(dec!(1.0840)));
    }

    #[tokio::test]
    async fn trailing_reports_orders_to_start() {
        let (table, bridge, interpreter) = setup();
        let a = executed_order(&table, &bridge, "alpha", dec!(0.20)).await;

        let result = interpreter.apply("trailing", "alpha", None).await.unwrap();
        assert_eq!(result.start_trailing, vec![a]);
    }

    #[tokio::test]
    async fn cancel_only_touches_pending_orders() {
        let (table, bridge, interpreter) = setup();
        let executed = executed_order(&table, &bridge, "alpha", dec!(0.20)).await;

        let pending = TradingOrder {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            pair: "EURUSD".to_string(),
            order_type: OrderType::BuyLimit,
            lot_size: dec!(0.10),
            entry_price: Some(dec!(1.0800)),
            stop_loss: None,
            take_profit_levels: Vec::new(),
            broker_ticket: None,
            sub_tickets: Vec::new(),
            status: OrderStatus::Pending,
            provider_id: "alpha".to_string(),
            comment: None,
            magic_number: None,
            created_at: Utc::now(),
            executed_at: None,
        };
        let pending_id = pending.id;
        table.insert(pending).await;

        let result = interpreter.apply("cancel", "alpha", None).await.unwrap();
        assert_eq!(result.affected, 1);
        assert_eq!(table.get(pending_id).await.unwrap().status, OrderStatus::Cancelled);
        assert_eq!(table.get(executed).await.unwrap().status, OrderStatus::Executed);
    }

    #[tokio::test]
    async fn unmatched_text_is_an_explicit_error() {
        let (_table, _bridge, interpreter) = setup();
        let err = interpreter.apply("do something", "alpha", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::CommandUnmatched { .. }));
    }
}
