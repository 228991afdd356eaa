//! The `Bridge` trait and the socket client implementation.
//!
//! The terminal is reached over a duplex length-prefixed JSON channel: a
//! `u32` big-endian byte count followed by one serialized envelope, in each
//! direction. Every call shares the fixed 10-second timeout; a timeout means
//! the outcome at the broker is unknown.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::protocol::{
    AccountInfo, BridgeRequest, BridgeResponse, BrokerPosition, PlaceOrderRequest, Quote,
};

/// Fixed command/response timeout.
pub const BRIDGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Narrow command/response surface of the broker terminal.
#[async_trait]
pub trait Bridge: Send + Sync {
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<u64>;
    async fn modify_order(
        &self,
        ticket: u64,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<()>;
    async fn close_partial(&self, ticket: u64, lot_size: Decimal) -> Result<()>;
    async fn close_order(&self, ticket: u64) -> Result<()>;
    async fn cancel_order(&self, ticket: u64) -> Result<()>;
    async fn quote(&self, symbol: &str) -> Result<Quote>;
    /// Current spread for a symbol, in pips.
    async fn spread(&self, symbol: &str) -> Result<f64>;
    async fn account_info(&self) -> Result<AccountInfo>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>>;
    /// Closes everything; returns the number of closed positions.
    async fn emergency_close_all(&self) -> Result<u32>;
}

/// Bridge client over a persistent TCP connection to the terminal side.
pub struct SocketBridge {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl SocketBridge {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            stream: Mutex::new(None),
        }
    }

    /// Sends one envelope and awaits its response under the fixed timeout.
    ///
    /// The connection is serialized through a mutex: the terminal protocol
    /// is strictly request/response, so interleaving two commands on one
    /// stream would cross their replies.
    async fn exchange(&self, request: &BridgeRequest) -> Result<BridgeResponse> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| BridgeError::Connection(format!("connect {}: {e}", self.addr)))?;
            debug!(addr = %self.addr, "Bridge connected");
            *guard = Some(stream);
        }

        let stream = guard.as_mut().expect("stream populated above");
        let payload = serde_json::to_vec(request)?;

        let result = tokio::time::timeout(BRIDGE_TIMEOUT, async {
            stream.write_u32(u32::try_from(payload.len()).map_err(|_| {
                BridgeError::Protocol("request exceeds frame size".to_string())
            })?).await?;
            stream.write_all(&payload).await?;
            stream.flush().await?;

            let len = stream.read_u32().await? as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            let response: BridgeResponse = serde_json::from_slice(&buf)?;
            Ok::<BridgeResponse, BridgeError>(response)
        })
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                // Drop the stream: a failed frame leaves it desynchronized.
                *guard = None;
                warn!(error = %e, "Bridge exchange failed, dropping connection");
                Err(e)
            }
            Err(_) => {
                *guard = None;
                Err(BridgeError::Timeout {
                    timeout_secs: BRIDGE_TIMEOUT.as_secs(),
                })
            }
        }
    }

    fn expect_success(response: BridgeResponse) -> Result<BridgeResponse> {
        match response {
            BridgeResponse::Error { message } => Err(BridgeError::Rejected { message }),
            BridgeResponse::Timeout => Err(BridgeError::Timeout {
                timeout_secs: BRIDGE_TIMEOUT.as_secs(),
            }),
            success => Ok(success),
        }
    }
}

#[async_trait]
impl Bridge for SocketBridge {
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<u64> {
        let response = self.exchange(&BridgeRequest::PlaceOrder(request)).await?;
        match Self::expect_success(response)? {
            BridgeResponse::Success {
                ticket: Some(ticket),
                ..
            } => Ok(ticket),
            _ => Err(BridgeError::Protocol(
                "place_order response missing ticket".to_string(),
            )),
        }
    }

    async fn modify_order(
        &self,
        ticket: u64,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<()> {
        let response = self
            .exchange(&BridgeRequest::ModifyOrder {
                ticket,
                stop_loss,
                take_profit,
            })
            .await?;
        Self::expect_success(response).map(|_| ())
    }

    async fn close_partial(&self, ticket: u64, lot_size: Decimal) -> Result<()> {
        let response = self
            .exchange(&BridgeRequest::ClosePartial { ticket, lot_size })
            .await?;
        Self::expect_success(response).map(|_| ())
    }

    async fn close_order(&self, ticket: u64) -> Result<()> {
        let response = self.exchange(&BridgeRequest::CloseOrder { ticket }).await?;
        Self::expect_success(response).map(|_| ())
    }

    async fn cancel_order(&self, ticket: u64) -> Result<()> {
        let response = self.exchange(&BridgeRequest::CancelOrder { ticket }).await?;
        Self::expect_success(response).map(|_| ())
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let response = self
            .exchange(&BridgeRequest::GetPrice {
                symbol: symbol.to_string(),
            })
            .await?;
        match Self::expect_success(response)? {
            BridgeResponse::Success {
                bid: Some(bid),
                ask: Some(ask),
                ..
            } => Ok(Quote { bid, ask }),
            _ => Err(BridgeError::Protocol(
                "get_price response missing quote".to_string(),
            )),
        }
    }

    async fn spread(&self, symbol: &str) -> Result<f64> {
        let response = self
            .exchange(&BridgeRequest::GetSpread {
                symbol: symbol.to_string(),
            })
            .await?;
        match Self::expect_success(response)? {
            BridgeResponse::Success {
                spread_pips: Some(spread),
                ..
            } => Ok(spread),
            _ => Err(BridgeError::Protocol(
                "get_spread response missing spread".to_string(),
            )),
        }
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let response = self.exchange(&BridgeRequest::GetAccountInfo).await?;
        match Self::expect_success(response)? {
            BridgeResponse::Success {
                account: Some(account),
                ..
            } => Ok(account),
            _ => Err(BridgeError::Protocol(
                "get_account_info response missing account".to_string(),
            )),
        }
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let response = self.exchange(&BridgeRequest::GetPositions).await?;
        match Self::expect_success(response)? {
            BridgeResponse::Success {
                positions: Some(positions),
                ..
            } => Ok(positions),
            _ => Err(BridgeError::Protocol(
                "get_positions response missing positions".to_string(),
            )),
        }
    }

    async fn emergency_close_all(&self) -> Result<u32> {
        let response = self.exchange(&BridgeRequest::EmergencyCloseAll).await?;
        match Self::expect_success(response)? {
            BridgeResponse::Success { closed_count, .. } => Ok(closed_count.unwrap_or(0)),
            _ => unreachable!("expect_success filtered error variants"),
        }
    }
}
