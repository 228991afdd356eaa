//! Per-order monitors: smart entry, trailing stop, pending expiry.
//!
//! Each monitor is a spawned task keyed to one order id. Monitors never
//! hold a private copy of the order: every iteration re-reads the live
//! table, so an external cancellation (the id disappearing) or a terminal
//! status is observed on the next poll and the task exits. A failed poll is
//! logged and retried on the next tick rather than killing the monitor.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sigpilot_bridge::Bridge;
use sigpilot_core::table::OrderTable;
use sigpilot_core::types::{pip_size, OrderStatus, TradeAction};

use crate::executor::Executor;

/// Poll cadence shared by the smart-entry and trailing monitors.
pub const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Waits for entry conditions, then delegates to market execution. Gives up
/// after the configured timeout and drops the order from the pending set.
pub fn spawn_smart_entry(
    executor: Executor,
    order_id: Uuid,
    sltp_delay: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let timeout = Duration::from_secs(executor.settings().smart_entry_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticks = tokio::time::interval(MONITOR_POLL_INTERVAL);
        info!(order_id = %order_id, ?timeout, "Smart-entry monitor started");

        loop {
            ticks.tick().await;

            let Some(order) = executor.table().get(order_id).await else {
                debug!(order_id = %order_id, "Smart-entry monitor: order removed");
                return;
            };
            if order.status != OrderStatus::Pending {
                return;
            }

            match executor.entry_conditions_met(&order).await {
                Ok(true) => {
                    info!(order_id = %order_id, "Entry conditions met");
                    executor.execute_market(order_id, sltp_delay).await;
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "Smart-entry poll failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                executor.table().remove(order_id).await;
                warn!(order_id = %order_id, "Smart-entry wait timed out, order dropped");
                return;
            }
        }
    })
}

/// Ratchets the stop-loss behind the best price reached. Moves are
/// committed only when they strictly improve the existing stop.
pub fn spawn_trailing(executor: Executor, order_id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        let distance_pips = executor.settings().trailing_distance_pips;
        let mut ticks = tokio::time::interval(MONITOR_POLL_INTERVAL);
        let mut best_price: Option<Decimal> = None;
        info!(order_id = %order_id, distance_pips, "Trailing-stop monitor started");

        loop {
            ticks.tick().await;

            let Some(order) = executor.table().get(order_id).await else {
                debug!(order_id = %order_id, "Trailing monitor: order removed");
                return;
            };
            if order.status.is_terminal() {
                return;
            }
            if !order.status.is_live() {
                continue;
            }
            let Some(ticket) = order.broker_ticket else {
                continue;
            };

            let quote = match executor.bridge().quote(&order.pair).await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "Trailing poll failed");
                    continue;
                }
            };

            let direction = order.order_type.direction();
            // Exit side of the book: a BUY closes at bid, a SELL at ask.
            let price = match direction {
                TradeAction::Buy => quote.bid,
                TradeAction::Sell => quote.ask,
            };

            let best = match (best_price, direction) {
                (None, _) => price,
                (Some(best), TradeAction::Buy) => best.max(price),
                (Some(best), TradeAction::Sell) => best.min(price),
            };
            best_price = Some(best);

            let distance = pip_size(&order.pair)
                * Decimal::try_from(distance_pips).unwrap_or(Decimal::ZERO);
            let candidate = match direction {
                TradeAction::Buy => best - distance,
                TradeAction::Sell => best + distance,
            };

            let improves = match (direction, order.stop_loss) {
                (_, None) => true,
                (TradeAction::Buy, Some(current)) => candidate > current,
                (TradeAction::Sell, Some(current)) => candidate < current,
            };
            if !improves {
                continue;
            }

            if let Err(e) = executor
                .bridge()
                .modify_order(ticket, Some(candidate), None)
                .await
            {
                warn!(order_id = %order_id, error = %e, "Trailing stop move failed");
                continue;
            }
            executor
                .table()
                .update(order_id, |o| o.stop_loss = Some(candidate))
                .await;
            if let Err(e) = executor
                .table()
                .transition(order_id, OrderStatus::Modified)
                .await
            {
                debug!(order_id = %order_id, error = %e, "Trailing transition");
            }
            info!(order_id = %order_id, new_stop = %candidate, "Trailing stop advanced");
        }
    })
}

/// One deferred cancellation at placement time + expiry hours. Fires only
/// if the order is still pending.
pub fn spawn_pending_expiry(executor: Executor, order_id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        let hours = executor.settings().pending_expiry_hours;
        tokio::time::sleep(Duration::from_secs(hours * 3_600)).await;

        let Some(order) = executor.table().get(order_id).await else {
            return;
        };
        if order.status != OrderStatus::Pending {
            return;
        }

        if let Some(ticket) = order.broker_ticket {
            if let Err(e) = executor.bridge().cancel_order(ticket).await {
                warn!(order_id = %order_id, error = %e, "Expiry cancel failed at broker");
            }
        }
        if let Err(e) = executor
            .table()
            .transition(order_id, OrderStatus::Cancelled)
            .await
        {
            warn!(order_id = %order_id, error = %e, "Expiry transition failed");
            return;
        }
        info!(order_id = %order_id, hours, "Pending order expired and cancelled");
    })
}

/// Applies stop-loss/take-profit to freshly placed tickets after the
/// stealth delay, so the broker record never shows them at entry time.
pub fn spawn_deferred_sltp(
    bridge: Arc<dyn Bridge>,
    table: OrderTable,
    order_id: Uuid,
    mods: Vec<(u64, Option<Decimal>, Option<Decimal>)>,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        if table.get(order_id).await.is_none() {
            debug!(order_id = %order_id, "Deferred SL/TP: order removed");
            return;
        }
        for (ticket, stop_loss, take_profit) in mods {
            if stop_loss.is_none() && take_profit.is_none() {
                continue;
            }
            if let Err(e) = bridge.modify_order(ticket, stop_loss, take_profit).await {
                warn!(order_id = %order_id, ticket, error = %e, "Deferred SL/TP failed");
            }
        }
        info!(order_id = %order_id, "Deferred SL/TP applied");
    })
}
