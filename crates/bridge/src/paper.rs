//! Paper bridge: simulated terminal for tests and dry runs.
//!
//! Fills every placement instantly at the configured quote, tracks
//! positions in memory, and exposes knobs to inject broker errors and
//! timeouts so failure paths can be exercised without a terminal.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use sigpilot_core::types::OrderType;

use crate::client::{Bridge, BRIDGE_TIMEOUT};
use crate::error::{BridgeError, Result};
use crate::protocol::{AccountInfo, BrokerPosition, PlaceOrderRequest, Quote};

#[derive(Debug)]
struct PaperState {
    quotes: HashMap<String, Quote>,
    spread_pips: f64,
    next_ticket: u64,
    positions: Vec<BrokerPosition>,
    account: AccountInfo,
    /// Closed or cancelled tickets, newest last.
    closed: Vec<u64>,
    fail_next_place: Option<String>,
    timeout_next_place: bool,
}

pub struct PaperBridge {
    state: Mutex<PaperState>,
}

impl Default for PaperBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBridge {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState {
                quotes: HashMap::new(),
                spread_pips: 1.0,
                next_ticket: 1_000,
                positions: Vec::new(),
                account: AccountInfo {
                    balance: Decimal::from(10_000),
                    equity: Decimal::from(10_000),
                    margin_level: None,
                    daily_pnl: Decimal::ZERO,
                    daily_trades: 0,
                },
                closed: Vec::new(),
                fail_next_place: None,
                timeout_next_place: false,
            }),
        }
    }

    /// Sets the two-sided quote for a symbol.
    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut state = self.state.lock().expect("paper state poisoned");
        state.quotes.insert(symbol.to_string(), Quote { bid, ask });
    }

    pub fn set_spread_pips(&self, spread: f64) {
        self.state.lock().expect("paper state poisoned").spread_pips = spread;
    }

    pub fn set_account(&self, account: AccountInfo) {
        self.state.lock().expect("paper state poisoned").account = account;
    }

    /// Next `place_order` call fails with a broker rejection.
    pub fn fail_next_place(&self, message: &str) {
        self.state.lock().expect("paper state poisoned").fail_next_place =
            Some(message.to_string());
    }

    /// Next `place_order` call reports a timeout. The position is still
    /// created, mirroring the real ambiguity of a timed-out placement.
    pub fn timeout_next_place(&self) {
        self.state.lock().expect("paper state poisoned").timeout_next_place = true;
    }

    pub fn open_positions(&self) -> Vec<BrokerPosition> {
        self.state.lock().expect("paper state poisoned").positions.clone()
    }

    pub fn closed_tickets(&self) -> Vec<u64> {
        self.state.lock().expect("paper state poisoned").closed.clone()
    }

    fn quote_or_default(state: &PaperState, symbol: &str) -> Quote {
        state.quotes.get(symbol).copied().unwrap_or(Quote {
            bid: Decimal::ONE,
            ask: Decimal::ONE,
        })
    }
}

#[async_trait]
impl Bridge for PaperBridge {
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<u64> {
        let mut state = self.state.lock().expect("paper state poisoned");

        if let Some(message) = state.fail_next_place.take() {
            return Err(BridgeError::Rejected { message });
        }

        let quote = Self::quote_or_default(&state, &request.symbol);
        let open_price = match request.order_type {
            OrderType::Buy => quote.ask,
            OrderType::Sell => quote.bid,
            _ => request.entry_price.unwrap_or(quote.mid()),
        };

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.positions.push(BrokerPosition {
            ticket,
            symbol: request.symbol.clone(),
            order_type: request.order_type,
            lot_size: request.lot_size,
            open_price,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            magic: request.magic,
        });
        state.account.daily_trades += 1;

        if state.timeout_next_place {
            state.timeout_next_place = false;
            return Err(BridgeError::Timeout {
                timeout_secs: BRIDGE_TIMEOUT.as_secs(),
            });
        }

        info!(
            ticket,
            symbol = request.symbol,
            lot = %request.lot_size,
            "Paper fill"
        );
        Ok(ticket)
    }

    async fn modify_order(
        &self,
        ticket: u64,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("paper state poisoned");
        let position = state
            .positions
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .ok_or(BridgeError::TicketNotFound { ticket })?;
        if stop_loss.is_some() {
            position.stop_loss = stop_loss;
        }
        if take_profit.is_some() {
            position.take_profit = take_profit;
        }
        Ok(())
    }

    async fn close_partial(&self, ticket: u64, lot_size: Decimal) -> Result<()> {
        let mut state = self.state.lock().expect("paper state poisoned");
        let position = state
            .positions
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .ok_or(BridgeError::TicketNotFound { ticket })?;
        if lot_size >= position.lot_size {
            return Err(BridgeError::rejected("partial close exceeds position"));
        }
        position.lot_size -= lot_size;
        Ok(())
    }

    async fn close_order(&self, ticket: u64) -> Result<()> {
        let mut state = self.state.lock().expect("paper state poisoned");
        let idx = state
            .positions
            .iter()
            .position(|p| p.ticket == ticket)
            .ok_or(BridgeError::TicketNotFound { ticket })?;
        state.positions.remove(idx);
        state.closed.push(ticket);
        Ok(())
    }

    async fn cancel_order(&self, ticket: u64) -> Result<()> {
        self.close_order(ticket).await
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let state = self.state.lock().expect("paper state poisoned");
        Ok(Self::quote_or_default(&state, symbol))
    }

    async fn spread(&self, _symbol: &str) -> Result<f64> {
        Ok(self.state.lock().expect("paper state poisoned").spread_pips)
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        Ok(self.state.lock().expect("paper state poisoned").account.clone())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.open_positions())
    }

    async fn emergency_close_all(&self) -> Result<u32> {
        let mut state = self.state.lock().expect("paper state poisoned");
        let count = u32::try_from(state.positions.len()).unwrap_or(u32::MAX);
        let tickets: Vec<u64> = state.positions.iter().map(|p| p.ticket).collect();
        state.closed.extend(tickets);
        state.positions.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_buy(symbol: &str, lot: Decimal) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: symbol.to_string(),
            order_type: OrderType::Buy,
            lot_size: lot,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            comment: None,
            magic: None,
        }
    }

    #[tokio::test]
    async fn fills_at_ask_for_buys() {
        let bridge = PaperBridge::new();
        bridge.set_quote("EURUSD", dec!(1.0848), dec!(1.0850));

        let ticket = bridge.place_order(market_buy("EURUSD", dec!(0.10))).await.unwrap();
        let positions = bridge.open_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].ticket, ticket);
        assert_eq!(positions[0].open_price, dec!(1.0850));
    }

    #[tokio::test]
    async fn injected_rejection_surfaces_once() {
        let bridge = PaperBridge::new();
        bridge.fail_next_place("not enough money");

        let err = bridge.place_order(market_buy("EURUSD", dec!(0.10))).await.unwrap_err();
        assert!(matches!(err, BridgeError::Rejected { .. }));
        assert!(bridge.place_order(market_buy("EURUSD", dec!(0.10))).await.is_ok());
    }

    #[tokio::test]
    async fn injected_timeout_still_creates_position() {
        let bridge = PaperBridge::new();
        bridge.timeout_next_place();

        let err = bridge.place_order(market_buy("EURUSD", dec!(0.10))).await.unwrap_err();
        assert!(err.is_ambiguous());
        assert_eq!(bridge.open_positions().len(), 1);
    }

    #[tokio::test]
    async fn partial_close_reduces_lot() {
        let bridge = PaperBridge::new();
        let ticket = bridge.place_order(market_buy("EURUSD", dec!(0.20))).await.unwrap();
        bridge.close_partial(ticket, dec!(0.10)).await.unwrap();
        assert_eq!(bridge.open_positions()[0].lot_size, dec!(0.10));
    }

    #[tokio::test]
    async fn emergency_close_all_empties_book() {
        let bridge = PaperBridge::new();
        bridge.place_order(market_buy("EURUSD", dec!(0.10))).await.unwrap();
        bridge.place_order(market_buy("GBPUSD", dec!(0.10))).await.unwrap();
        assert_eq!(bridge.emergency_close_all().await.unwrap(), 2);
        assert!(bridge.open_positions().is_empty());
    }
}
