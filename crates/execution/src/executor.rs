//! Order dispatch against the bridge.
//!
//! Market fills attach the first take-profit to the primary ticket and
//! place every further level as an additional broker order at its
//! proportional lot, working around brokers without native multi-TP. A
//! placement timeout triggers a reconciliation pass over open positions
//! before the order is declared lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use sigpilot_bridge::{Bridge, BridgeError, PlaceOrderRequest};
use sigpilot_core::settings::ExecutionSettings;
use sigpilot_core::table::OrderTable;
use sigpilot_core::types::{pip_size, OrderStatus, TradeAction, TradingOrder};

use crate::builder::{select_strategy, split_lots, ExecutionStrategy};
use crate::monitors;

/// Stealth-derived instructions for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchPlan {
    /// Sleep before the first bridge call.
    pub execution_delay: Option<Duration>,
    /// When set, orders go out naked and SL/TP are attached this long
    /// after the fill.
    pub sltp_delay: Option<Duration>,
}

/// Terminal outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed { order_id: Uuid, ticket: u64 },
    /// Entry conditions not met; a smart-execution monitor took over.
    QueuedSmartEntry { order_id: Uuid },
    PendingPlaced { order_id: Uuid, ticket: u64 },
    Failed { order_id: Uuid, reason: String },
}

#[derive(Clone)]
pub struct Executor {
    bridge: Arc<dyn Bridge>,
    table: OrderTable,
    settings: ExecutionSettings,
}

impl Executor {
    #[must_use]
    pub fn new(bridge: Arc<dyn Bridge>, table: OrderTable, settings: ExecutionSettings) -> Self {
        Self {
            bridge,
            table,
            settings,
        }
    }

    #[must_use]
    pub fn table(&self) -> &OrderTable {
        &self.table
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Inserts the order into the live table and runs the selected
    /// execution strategy.
    pub async fn dispatch(&self, order: TradingOrder, plan: DispatchPlan) -> ExecutionOutcome {
        let order_id = order.id;
        let strategy = select_strategy(&order, &self.settings);
        info!(
            order_id = %order_id,
            pair = order.pair,
            ?strategy,
            lot = %order.lot_size,
            "Dispatching order"
        );
        self.table.insert(order).await;

        if let Some(delay) = plan.execution_delay {
            tokio::time::sleep(delay).await;
            if self.table.get(order_id).await.is_none() {
                return ExecutionOutcome::Failed {
                    order_id,
                    reason: "order cancelled during stealth delay".to_string(),
                };
            }
        }

        match strategy {
            ExecutionStrategy::Pending => self.place_pending(order_id).await,
            ExecutionStrategy::Market => self.execute_market(order_id, plan.sltp_delay).await,
            ExecutionStrategy::Conditional => {
                let conditions = match self.table.get(order_id).await {
                    Some(order) => self.entry_conditions_met(&order).await,
                    None => {
                        return ExecutionOutcome::Failed {
                            order_id,
                            reason: "order removed before execution".to_string(),
                        }
                    }
                };
                match conditions {
                    Ok(true) => self.execute_market(order_id, plan.sltp_delay).await,
                    // Not met (or not knowable right now): the monitor polls
                    // until conditions pass or the wait times out.
                    Ok(false) | Err(_) => {
                        monitors::spawn_smart_entry(self.clone(), order_id, plan.sltp_delay);
                        ExecutionOutcome::QueuedSmartEntry { order_id }
                    }
                }
            }
        }
    }

    /// Checks the smart-entry gate: spread within bounds and market price
    /// within the allowed deviation from the requested entry.
    pub(crate) async fn entry_conditions_met(
        &self,
        order: &TradingOrder,
    ) -> Result<bool, BridgeError> {
        let spread = self.bridge.spread(&order.pair).await?;
        if spread > self.settings.max_spread_pips {
            return Ok(false);
        }

        if let Some(entry) = order.entry_price {
            let quote = self.bridge.quote(&order.pair).await?;
            let market = match order.order_type.direction() {
                TradeAction::Buy => quote.ask,
                TradeAction::Sell => quote.bid,
            };
            let deviation_pips: f64 = ((market - entry).abs() / pip_size(&order.pair))
                .try_into()
                .unwrap_or(f64::MAX);
            if deviation_pips > self.settings.max_deviation_pips {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fills at market, placing the multi-TP legs and starting the trailing
    /// monitor on success.
    pub(crate) async fn execute_market(
        &self,
        order_id: Uuid,
        sltp_delay: Option<Duration>,
    ) -> ExecutionOutcome {
        let Some(order) = self.table.get(order_id).await else {
            return ExecutionOutcome::Failed {
                order_id,
                reason: "order removed before execution".to_string(),
            };
        };

        let shares = split_lots(order.lot_size, &order.take_profit_levels, &self.settings);
        let defer = sltp_delay.is_some();
        let first_tp = order.first_take_profit();

        let request = PlaceOrderRequest {
            symbol: order.pair.clone(),
            order_type: order.order_type,
            lot_size: shares[0],
            entry_price: order.entry_price,
            stop_loss: (!defer).then_some(order.stop_loss).flatten(),
            take_profit: (!defer).then_some(first_tp).flatten(),
            comment: order.comment.clone(),
            magic: order.magic_number,
        };

        let ticket = match self.bridge.place_order(request).await {
            Ok(ticket) => ticket,
            Err(e) if e.is_ambiguous() => {
                return self.reconcile_timeout(order_id, shares[0]).await;
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Market placement failed");
                self.table.remove(order_id).await;
                return ExecutionOutcome::Failed {
                    order_id,
                    reason: e.to_string(),
                };
            }
        };

        self.table
            .update(order_id, |o| {
                o.broker_ticket = Some(ticket);
                o.executed_at = Some(Utc::now());
            })
            .await;
        if let Err(e) = self.table.transition(order_id, OrderStatus::Executed).await {
            warn!(order_id = %order_id, error = %e, "Status transition after fill");
        }

        // Deferred SL/TP applies to the primary ticket and every leg.
        let mut deferred_mods: Vec<(u64, Option<Decimal>, Option<Decimal>)> = Vec::new();
        if defer {
            deferred_mods.push((ticket, order.stop_loss, first_tp));
        }

        for (i, level) in order.take_profit_levels.iter().enumerate().skip(1) {
            let leg = PlaceOrderRequest {
                symbol: order.pair.clone(),
                order_type: order.order_type,
                lot_size: shares[i],
                entry_price: order.entry_price,
                stop_loss: (!defer).then_some(order.stop_loss).flatten(),
                take_profit: (!defer).then(|| level.price),
                comment: order.comment.clone(),
                magic: order.magic_number,
            };
            match self.bridge.place_order(leg).await {
                Ok(leg_ticket) => {
                    self.table
                        .update(order_id, |o| o.sub_tickets.push(leg_ticket))
                        .await;
                    if defer {
                        deferred_mods.push((leg_ticket, order.stop_loss, Some(level.price)));
                    }
                }
                Err(e) => {
                    warn!(
                        order_id = %order_id,
                        level = level.level,
                        error = %e,
                        "Take-profit leg placement failed"
                    );
                }
            }
        }

        if let Some(delay) = sltp_delay {
            monitors::spawn_deferred_sltp(
                Arc::clone(&self.bridge),
                self.table.clone(),
                order_id,
                deferred_mods,
                delay,
            );
        }
        if self.settings.trailing_enabled {
            monitors::spawn_trailing(self.clone(), order_id);
        }

        info!(order_id = %order_id, ticket, "Order executed");
        ExecutionOutcome::Executed { order_id, ticket }
    }

    async fn place_pending(&self, order_id: Uuid) -> ExecutionOutcome {
        let Some(order) = self.table.get(order_id).await else {
            return ExecutionOutcome::Failed {
                order_id,
                reason: "order removed before placement".to_string(),
            };
        };

        if order.entry_price.is_none() {
            self.table.remove(order_id).await;
            return ExecutionOutcome::Failed {
                order_id,
                reason: "pending order without entry price".to_string(),
            };
        }

        let request = PlaceOrderRequest {
            symbol: order.pair.clone(),
            order_type: order.order_type,
            lot_size: order.lot_size,
            entry_price: order.entry_price,
            stop_loss: order.stop_loss,
            take_profit: order.first_take_profit(),
            comment: order.comment.clone(),
            magic: order.magic_number,
        };

        match self.bridge.place_order(request).await {
            Ok(ticket) => {
                self.table
                    .update(order_id, |o| o.broker_ticket = Some(ticket))
                    .await;
                monitors::spawn_pending_expiry(self.clone(), order_id);
                info!(order_id = %order_id, ticket, "Pending order placed");
                ExecutionOutcome::PendingPlaced { order_id, ticket }
            }
            Err(e) if e.is_ambiguous() => self.reconcile_timeout(order_id, order.lot_size).await,
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Pending placement failed");
                self.table.remove(order_id).await;
                ExecutionOutcome::Failed {
                    order_id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// A timed-out placement may still have reached the broker. Query open
    /// positions and adopt a match on pair, lot, and magic; otherwise the
    /// order is dropped.
    async fn reconcile_timeout(&self, order_id: Uuid, placed_lot: Decimal) -> ExecutionOutcome {
        let Some(order) = self.table.get(order_id).await else {
            return ExecutionOutcome::Failed {
                order_id,
                reason: "order removed during reconciliation".to_string(),
            };
        };
        warn!(order_id = %order_id, "Placement timed out, reconciling against open positions");

        match self.bridge.positions().await {
            Ok(positions) => {
                let adopted = positions.iter().rev().find(|p| {
                    p.symbol == order.pair
                        && p.lot_size == placed_lot
                        && p.order_type == order.order_type
                        && p.magic == order.magic_number
                });
                match adopted {
                    Some(position) => {
                        let ticket = position.ticket;
                        self.table
                            .update(order_id, |o| {
                                o.broker_ticket = Some(ticket);
                                o.executed_at = Some(Utc::now());
                            })
                            .await;
                        if order.order_type.is_pending() {
                            monitors::spawn_pending_expiry(self.clone(), order_id);
                            info!(order_id = %order_id, ticket, "Adopted pending order after timeout");
                            ExecutionOutcome::PendingPlaced { order_id, ticket }
                        } else {
                            if let Err(e) =
                                self.table.transition(order_id, OrderStatus::Executed).await
                            {
                                warn!(order_id = %order_id, error = %e, "Transition after adoption");
                            }
                            info!(order_id = %order_id, ticket, "Adopted position after timeout");
                            ExecutionOutcome::Executed { order_id, ticket }
                        }
                    }
                    None => {
                        self.table.remove(order_id).await;
                        ExecutionOutcome::Failed {
                            order_id,
                            reason: "placement timed out, no matching broker position".to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Reconciliation query failed");
                self.table.remove(order_id).await;
                ExecutionOutcome::Failed {
                    order_id,
                    reason: format!("placement timed out, reconciliation failed: {e}"),
                }
            }
        }
    }
}
