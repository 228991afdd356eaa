//! Live-order table: the single authoritative store of open orders.
//!
//! The orchestrator owns the table; monitors and the command interpreter
//! hold a cloned handle plus an order id and re-read current state before
//! every action. Every mutation is one read-modify-write inside a single
//! lock guard with no await in between, so partial writes are never
//! observable. Removing an id is the cancellation primitive: monitors see
//! the miss on their next poll and exit.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::{OpenOrderBrief, OrderStatus, TradingOrder};

#[derive(Debug, Clone, Default)]
pub struct OrderTable {
    inner: Arc<RwLock<HashMap<Uuid, TradingOrder>>>,
}

impl OrderTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, order: TradingOrder) {
        self.inner.write().await.insert(order.id, order);
    }

    /// Snapshot of one order, if present.
    pub async fn get(&self, id: Uuid) -> Option<TradingOrder> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Removes an order. Running monitors for it exit on their next poll.
    pub async fn remove(&self, id: Uuid) -> Option<TradingOrder> {
        self.inner.write().await.remove(&id)
    }

    /// Applies `mutate` to the order under a single write guard.
    /// Returns false when the order is gone.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut TradingOrder),
    {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&id) {
            Some(order) => {
                mutate(order);
                true
            }
            None => false,
        }
    }

    /// Transitions an order's status, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` when the id is absent and `InvalidTransition`
    /// when the state machine forbids the move.
    pub async fn transition(&self, id: Uuid, to: OrderStatus) -> Result<(), PipelineError> {
        let mut guard = self.inner.write().await;
        let order = guard
            .get_mut(&id)
            .ok_or(PipelineError::OrderNotFound { order_id: id })?;
        if !order.status.can_transition_to(to) {
            return Err(PipelineError::InvalidTransition {
                order_id: id,
                from: order.status,
                to,
            });
        }
        order.status = to;
        Ok(())
    }

    /// Live and pending orders for one provider, optionally narrowed to a
    /// signal.
    pub async fn orders_for_provider(
        &self,
        provider_id: &str,
        signal_id: Option<Uuid>,
    ) -> Vec<TradingOrder> {
        self.inner
            .read()
            .await
            .values()
            .filter(|o| o.provider_id == provider_id)
            .filter(|o| signal_id.map_or(true, |sid| o.signal_id == sid))
            .filter(|o| o.status.is_live() || o.status == OrderStatus::Pending)
            .cloned()
            .collect()
    }

    /// Live orders belonging to one signal.
    pub async fn orders_for_signal(&self, signal_id: Uuid) -> Vec<TradingOrder> {
        self.inner
            .read()
            .await
            .values()
            .filter(|o| o.signal_id == signal_id && o.status.is_live())
            .cloned()
            .collect()
    }

    /// All non-terminal orders.
    pub async fn active(&self) -> Vec<TradingOrder> {
        self.inner
            .read()
            .await
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|o| !o.status.is_terminal())
            .count()
    }

    /// Sum of open lots on a pair across live orders.
    pub async fn pair_exposure(&self, pair: &str) -> Decimal {
        self.inner
            .read()
            .await
            .values()
            .filter(|o| o.pair == pair && o.status.is_live())
            .map(|o| o.lot_size)
            .sum()
    }

    /// Brief views of all non-terminal orders, for the risk gate.
    pub async fn briefs(&self) -> Vec<OpenOrderBrief> {
        self.inner
            .read()
            .await
            .values()
            .filter(|o| !o.status.is_terminal())
            .map(|o| OpenOrderBrief {
                order_id: o.id,
                provider_id: o.provider_id.clone(),
                pair: o.pair.clone(),
                lot_size: o.lot_size,
                status: o.status,
            })
            .collect()
    }
}
