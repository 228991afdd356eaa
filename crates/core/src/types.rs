//! Signal and order types shared across the pipeline.
//!
//! A [`ParsedSignal`] is produced once per incoming message; a
//! [`TradingOrder`] is created once the risk gate clears and is mutated in
//! place until it reaches a terminal status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    /// Immediate entry at market price.
    MarketOrder,
    /// Limit or stop entry away from market.
    PendingOrder,
    /// Changes SL/TP of an existing position.
    Modification,
    /// Closes an existing position.
    Closure,
    /// Free-text operator command ("close 50%", "be", ...).
    Command,
}

/// Parse confidence for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// Pair, action, and entry all present.
    High,
    /// At least one of pair/action/entry present.
    Medium,
    /// Reserved for the adaptive matcher; treated like Medium downstream.
    Low,
    /// Missing pair or action. Never forwarded to the risk gate.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// A field-level difference between two parses of the same message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Structured, confidence-scored result of parsing one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub signal_id: Uuid,
    pub original_text: String,
    pub signal_type: SignalType,
    pub confidence: Confidence,
    pub pair: Option<String>,
    pub action: Option<TradeAction>,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    /// Target prices in the order they appeared in the message.
    pub take_profits: Vec<Decimal>,
    pub lot_size: Option<Decimal>,
    pub risk_percent: Option<f64>,
    /// Explicit order kind when the text named one ("buy limit", "sell stop").
    pub order_type_hint: Option<OrderType>,
    pub provider_id: String,
    pub message_id: Option<String>,
    /// 0 for the first parse, incremented on each re-parse of the same message.
    pub edit_sequence: u32,
    /// Diff against the previous parse, stamped by `parse_edit`.
    pub field_changes: Vec<FieldChange>,
    pub parsed_at: DateTime<Utc>,
}

impl ParsedSignal {
    /// True when the signal can be forwarded to the risk gate.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.confidence != Confidence::Invalid
    }
}

/// One take-profit level of an order.
///
/// `lot_percentage` values across one order's levels sum to 100. For level
/// *i > 1*, `sl_move_on_hit` carries level *i-1*'s price so the stop ratchets
/// forward as targets fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// 1-based level index.
    pub level: u8,
    pub price: Decimal,
    /// Share of the total position closed at this level, in percent.
    pub lot_percentage: f64,
    pub sl_move_on_hit: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Buy,
    Sell,
    BuyLimit,
    SellLimit,
    BuyStop,
    SellStop,
}

impl OrderType {
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::Buy | Self::Sell)
    }

    #[must_use]
    pub const fn direction(self) -> TradeAction {
        match self {
            Self::Buy | Self::BuyLimit | Self::BuyStop => TradeAction::Buy,
            Self::Sell | Self::SellLimit | Self::SellStop => TradeAction::Sell,
        }
    }
}

/// Order lifecycle.
///
/// `Pending → Executed → {PartiallyClosed → Closed, Modified, Closed}`;
/// `Pending → Cancelled`. `Executed` and `Modified` are re-enterable;
/// `Cancelled` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Executed,
    Modified,
    PartiallyClosed,
    Cancelled,
    Closed,
}

impl OrderStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed)
    }

    /// True when the order still has broker-side exposure.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Executed | Self::Modified | Self::PartiallyClosed)
    }

    /// Whether the state machine permits moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Executed | Self::Cancelled),
            Self::Executed | Self::Modified => matches!(
                next,
                Self::Modified | Self::PartiallyClosed | Self::Closed
            ),
            Self::PartiallyClosed => matches!(
                next,
                Self::PartiallyClosed | Self::Modified | Self::Closed
            ),
            Self::Cancelled | Self::Closed => false,
        }
    }
}

/// A brokered order, owned by the orchestrator's live-order table.
///
/// Monitors hold the table handle plus this order's id, never a private
/// copy, so stop cascades and trailing updates land on the one authoritative
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingOrder {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub pair: String,
    pub order_type: OrderType,
    pub lot_size: Decimal,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit_levels: Vec<TakeProfitLevel>,
    /// Assigned only after the bridge reports a fill or placement.
    pub broker_ticket: Option<u64>,
    /// Tickets of the additional take-profit legs (multi-TP workaround).
    pub sub_tickets: Vec<u64>,
    pub status: OrderStatus,
    pub provider_id: String,
    pub comment: Option<String>,
    pub magic_number: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl TradingOrder {
    /// First take-profit price, if any level exists.
    #[must_use]
    pub fn first_take_profit(&self) -> Option<Decimal> {
        self.take_profit_levels.first().map(|l| l.price)
    }
}

/// Smallest standard price increment for a pair.
#[must_use]
pub fn pip_size(pair: &str) -> Decimal {
    if pair.contains("JPY") {
        Decimal::new(1, 2) // 0.01
    } else {
        Decimal::new(1, 4) // 0.0001
    }
}

/// Account metrics supplied to the risk gate, refreshed from the bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
    pub equity: Decimal,
    /// Margin level in percent; `None` when no positions are open.
    pub margin_level: Option<f64>,
    /// Realized profit/loss since the daily rollover.
    pub daily_pnl: Decimal,
    pub daily_trades: u32,
    /// Brief view of currently open/pending orders, assembled from the
    /// live-order table at evaluation time.
    pub open_orders: Vec<OpenOrderBrief>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AccountState {
    /// Sum of open lots on one pair.
    #[must_use]
    pub fn pair_exposure(&self, pair: &str) -> Decimal {
        self.open_orders
            .iter()
            .filter(|o| o.pair == pair)
            .map(|o| o.lot_size)
            .sum()
    }

    /// Number of open orders attributed to one provider.
    #[must_use]
    pub fn provider_open_count(&self, provider_id: &str) -> usize {
        self.open_orders
            .iter()
            .filter(|o| o.provider_id == provider_id)
            .count()
    }
}

/// Minimal per-order view used for exposure and concurrency checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrderBrief {
    pub order_id: Uuid,
    pub provider_id: String,
    pub pair: String,
    pub lot_size: Decimal,
    pub status: OrderStatus,
}

/// One executed trade, kept for stealth pattern analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub pair: String,
    pub action: TradeAction,
    pub lot_size: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pending_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Executed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Closed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::PartiallyClosed));
    }

    #[test]
    fn executed_is_reenterable_through_modified() {
        assert!(OrderStatus::Executed.can_transition_to(OrderStatus::Modified));
        assert!(OrderStatus::Modified.can_transition_to(OrderStatus::Modified));
        assert!(OrderStatus::Modified.can_transition_to(OrderStatus::Closed));
        assert!(OrderStatus::PartiallyClosed.can_transition_to(OrderStatus::Closed));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Executed,
            OrderStatus::Modified,
            OrderStatus::PartiallyClosed,
            OrderStatus::Cancelled,
            OrderStatus::Closed,
        ] {
            assert!(!OrderStatus::Cancelled.can_transition_to(next));
            assert!(!OrderStatus::Closed.can_transition_to(next));
        }
    }

    #[test]
    fn pip_size_jpy_pairs() {
        assert_eq!(pip_size("USDJPY"), dec!(0.01));
        assert_eq!(pip_size("EURUSD"), dec!(0.0001));
    }

    #[test]
    fn pair_exposure_sums_matching_orders() {
        let account = AccountState {
            open_orders: vec![
                OpenOrderBrief {
                    order_id: Uuid::new_v4(),
                    provider_id: "alpha".to_string(),
                    pair: "EURUSD".to_string(),
                    lot_size: dec!(0.20),
                    status: OrderStatus::Executed,
                },
                OpenOrderBrief {
                    order_id: Uuid::new_v4(),
                    provider_id: "alpha".to_string(),
                    pair: "GBPUSD".to_string(),
                    lot_size: dec!(0.10),
                    status: OrderStatus::Executed,
                },
            ],
            ..AccountState::default()
        };
        assert_eq!(account.pair_exposure("EURUSD"), dec!(0.20));
        assert_eq!(account.provider_open_count("alpha"), 2);
    }
}
