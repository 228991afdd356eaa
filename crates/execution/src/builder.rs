//! Order construction and execution-strategy selection.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use sigpilot_core::settings::ExecutionSettings;
use sigpilot_core::types::{
    OrderStatus, OrderType, ParsedSignal, TakeProfitLevel, TradeAction, TradingOrder,
};

/// Up to this many take-profit levels are carried onto one order.
pub const MAX_TP_LEVELS: usize = 100;

/// How an order will be handled after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Fill now at market.
    Market,
    /// Park at the broker as a limit/stop order.
    Pending,
    /// Gate the market fill behind smart-entry conditions.
    Conditional,
}

/// Pure decision table over order type and smart-entry mode.
#[must_use]
pub fn select_strategy(order: &TradingOrder, settings: &ExecutionSettings) -> ExecutionStrategy {
    if order.order_type.is_pending() {
        ExecutionStrategy::Pending
    } else if settings.smart_entry_enabled {
        ExecutionStrategy::Conditional
    } else {
        ExecutionStrategy::Market
    }
}

/// Builds a [`TradingOrder`] from an approved signal.
///
/// `lot_size` is the gate-approved (and possibly stealth-jittered) lot.
/// Take-profit levels get an even `lot_percentage` split when the signal
/// named no split, and every level after the first carries the previous
/// level's price as its stop-move target.
#[must_use]
pub fn build_order(
    signal: &ParsedSignal,
    lot_size: Decimal,
    comment: Option<String>,
    magic_number: Option<u32>,
) -> TradingOrder {
    let order_type = resolve_order_type(signal);
    let take_profit_levels = build_tp_levels(&signal.take_profits);

    TradingOrder {
        id: Uuid::new_v4(),
        signal_id: signal.signal_id,
        pair: signal.pair.clone().unwrap_or_default(),
        order_type,
        lot_size,
        entry_price: signal.entry_price,
        stop_loss: signal.stop_loss,
        take_profit_levels,
        broker_ticket: None,
        sub_tickets: Vec::new(),
        status: OrderStatus::Pending,
        provider_id: signal.provider_id.clone(),
        comment,
        magic_number,
        created_at: Utc::now(),
        executed_at: None,
    }
}

fn resolve_order_type(signal: &ParsedSignal) -> OrderType {
    if let Some(hint) = signal.order_type_hint {
        return hint;
    }
    let action = signal.action.unwrap_or(TradeAction::Buy);
    match (signal.signal_type, action) {
        (sigpilot_core::types::SignalType::PendingOrder, TradeAction::Buy) => OrderType::BuyLimit,
        (sigpilot_core::types::SignalType::PendingOrder, TradeAction::Sell) => OrderType::SellLimit,
        (_, TradeAction::Buy) => OrderType::Buy,
        (_, TradeAction::Sell) => OrderType::Sell,
    }
}

fn build_tp_levels(take_profits: &[Decimal]) -> Vec<TakeProfitLevel> {
    let prices = &take_profits[..take_profits.len().min(MAX_TP_LEVELS)];
    if prices.is_empty() {
        return Vec::new();
    }
    #[allow(clippy::cast_precision_loss)]
    let share = 100.0 / prices.len() as f64;

    prices
        .iter()
        .enumerate()
        .map(|(i, price)| TakeProfitLevel {
            level: u8::try_from(i + 1).unwrap_or(u8::MAX),
            price: *price,
            lot_percentage: share,
            sl_move_on_hit: if i == 0 { None } else { Some(prices[i - 1]) },
        })
        .collect()
}

/// Splits a total lot across take-profit levels by their percentages,
/// quantized to the broker step. Rounding drift lands on the first level so
/// the shares always sum back to the total.
#[must_use]
pub fn split_lots(
    total: Decimal,
    levels: &[TakeProfitLevel],
    settings: &ExecutionSettings,
) -> Vec<Decimal> {
    if levels.len() <= 1 {
        return vec![total];
    }
    let mut shares: Vec<Decimal> = levels
        .iter()
        .map(|level| {
            let pct = Decimal::try_from(level.lot_percentage).unwrap_or(Decimal::ZERO);
            let raw = total * pct / Decimal::ONE_HUNDRED;
            round_to_step(raw, settings.lot_step).max(settings.min_lot)
        })
        .collect();

    let sum: Decimal = shares.iter().sum();
    let drift = total - sum;
    shares[0] = (shares[0] + drift).max(settings.min_lot);
    shares
}

pub(crate) fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).round() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sigpilot_core::types::{Confidence, SignalType};

    fn signal_with_tps(tps: Vec<Decimal>) -> ParsedSignal {
        ParsedSignal {
            signal_id: Uuid::new_v4(),
            original_text: String::new(),
            signal_type: SignalType::MarketOrder,
            confidence: Confidence::High,
            pair: Some("EURUSD".to_string()),
            action: Some(TradeAction::Buy),
            entry_price: Some(dec!(1.0850)),
            stop_loss: Some(dec!(1.0820)),
            take_profits: tps,
            lot_size: None,
            risk_percent: None,
            order_type_hint: None,
            provider_id: "alpha".to_string(),
            message_id: None,
            edit_sequence: 0,
            field_changes: Vec::new(),
            parsed_at: Utc::now(),
        }
    }

    #[test]
    fn tp_percentages_sum_to_hundred_and_cascade() {
        let order = build_order(
            &signal_with_tps(vec![dec!(1.0900), dec!(1.0950), dec!(1.1000)]),
            dec!(0.30),
            None,
            None,
        );
        let levels = &order.take_profit_levels;
        assert_eq!(levels.len(), 3);

        let total: f64 = levels.iter().map(|l| l.lot_percentage).sum();
        assert!((total - 100.0).abs() < 0.01);

        assert_eq!(levels[0].sl_move_on_hit, None);
        assert_eq!(levels[1].sl_move_on_hit, Some(dec!(1.0900)));
        assert_eq!(levels[2].sl_move_on_hit, Some(dec!(1.0950)));
        assert_eq!(levels[1].level, 2);
    }

    #[test]
    fn two_level_split_is_even() {
        let order = build_order(
            &signal_with_tps(vec![dec!(1.0900), dec!(1.0950)]),
            dec!(0.20),
            None,
            None,
        );
        assert!((order.take_profit_levels[0].lot_percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(order.take_profit_levels[1].sl_move_on_hit, Some(dec!(1.0900)));
    }

    #[test]
    fn tp_levels_are_capped() {
        let tps: Vec<Decimal> = (0..150).map(Decimal::from).collect();
        let order = build_order(&signal_with_tps(tps), dec!(1), None, None);
        assert_eq!(order.take_profit_levels.len(), MAX_TP_LEVELS);
    }

    #[test]
    fn pending_signal_without_hint_becomes_limit() {
        let mut signal = signal_with_tps(vec![]);
        signal.signal_type = SignalType::PendingOrder;
        signal.action = Some(TradeAction::Sell);
        let order = build_order(&signal, dec!(0.10), None, None);
        assert_eq!(order.order_type, OrderType::SellLimit);
    }

    #[test]
    fn explicit_hint_wins() {
        let mut signal = signal_with_tps(vec![]);
        signal.signal_type = SignalType::PendingOrder;
        signal.order_type_hint = Some(OrderType::BuyStop);
        let order = build_order(&signal, dec!(0.10), None, None);
        assert_eq!(order.order_type, OrderType::BuyStop);
    }

    #[test]
    fn strategy_decision_table() {
        let mut settings = ExecutionSettings::default();
        let market = build_order(&signal_with_tps(vec![]), dec!(0.1), None, None);
        assert_eq!(select_strategy(&market, &settings), ExecutionStrategy::Market);

        settings.smart_entry_enabled = true;
        assert_eq!(select_strategy(&market, &settings), ExecutionStrategy::Conditional);

        let mut pending_signal = signal_with_tps(vec![]);
        pending_signal.order_type_hint = Some(OrderType::BuyLimit);
        let pending = build_order(&pending_signal, dec!(0.1), None, None);
        assert_eq!(select_strategy(&pending, &settings), ExecutionStrategy::Pending);
    }

    #[test]
    fn lot_split_preserves_total() {
        let order = build_order(
            &signal_with_tps(vec![dec!(1.09), dec!(1.10), dec!(1.11)]),
            dec!(0.10),
            None,
            None,
        );
        let settings = ExecutionSettings::default();
        let shares = split_lots(dec!(0.10), &order.take_profit_levels, &settings);
        assert_eq!(shares.len(), 3);
        let sum: Decimal = shares.iter().sum();
        assert_eq!(sum, dec!(0.10));
        for share in &shares {
            assert!(*share >= settings.min_lot);
        }
    }
}
