pub mod client;
pub mod error;
pub mod paper;
pub mod protocol;

pub use client::{Bridge, SocketBridge, BRIDGE_TIMEOUT};
pub use error::BridgeError;
pub use paper::PaperBridge;
pub use protocol::{AccountInfo, BridgeRequest, BridgeResponse, BrokerPosition, PlaceOrderRequest, Quote};
