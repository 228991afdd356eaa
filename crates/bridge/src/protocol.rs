//! Wire envelope for the terminal bridge.
//!
//! Every exchange is a single request/response pair: a tagged command with
//! its fields, answered by a tagged status with its fields. No streaming.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sigpilot_core::types::OrderType;

/// Command envelope sent to the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BridgeRequest {
    PlaceOrder(PlaceOrderRequest),
    ModifyOrder {
        ticket: u64,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    },
    ClosePartial {
        ticket: u64,
        lot_size: Decimal,
    },
    CloseOrder {
        ticket: u64,
    },
    CancelOrder {
        ticket: u64,
    },
    GetPrice {
        symbol: String,
    },
    GetSpread {
        symbol: String,
    },
    GetAccountInfo,
    GetPositions,
    EmergencyCloseAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub order_type: OrderType,
    pub lot_size: Decimal,
    /// Required for pending orders; advisory for market orders.
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub comment: Option<String>,
    pub magic: Option<u32>,
}

/// Response envelope from the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeResponse {
    Success {
        #[serde(default)]
        ticket: Option<u64>,
        #[serde(default)]
        bid: Option<Decimal>,
        #[serde(default)]
        ask: Option<Decimal>,
        #[serde(default)]
        spread_pips: Option<f64>,
        #[serde(default)]
        account: Option<AccountInfo>,
        #[serde(default)]
        positions: Option<Vec<BrokerPosition>>,
        #[serde(default)]
        closed_count: Option<u32>,
    },
    Error {
        message: String,
    },
    Timeout,
}

/// Two-sided quote for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// Account snapshot reported by the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: Decimal,
    pub equity: Decimal,
    /// Percent; `None` when no positions are open.
    pub margin_level: Option<f64>,
    pub daily_pnl: Decimal,
    pub daily_trades: u32,
}

/// One open position as the terminal sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub symbol: String,
    pub order_type: OrderType,
    pub lot_size: Decimal,
    pub open_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub magic: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn request_envelope_is_action_tagged() {
        let req = BridgeRequest::CloseOrder { ticket: 42 };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["action"], "close_order");
        assert_eq!(json["ticket"], 42);
    }

    #[test]
    fn response_envelope_round_trips_partial_fields() {
        let json = r#"{"status":"success","ticket":7}"#;
        let resp: BridgeResponse = serde_json::from_str(json).unwrap();
        match resp {
            BridgeResponse::Success { ticket, bid, .. } => {
                assert_eq!(ticket, Some(7));
                assert!(bid.is_none());
            }
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn quote_mid_is_between_bid_and_ask() {
        let quote = Quote {
            bid: dec!(1.0848),
            ask: dec!(1.0850),
        };
        assert_eq!(quote.mid(), dec!(1.0849));
    }
}
