pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod settings;
pub mod table;
pub mod types;

pub use config::AppConfig;
pub use config_loader::ConfigLoader;
pub use error::PipelineError;
pub use events::{PipelineEvent, SubmitAck, SubmitStatus};
pub use table::OrderTable;
pub use types::{
    AccountState, Confidence, OrderStatus, OrderType, ParsedSignal, SignalType, TakeProfitLevel,
    TradeAction, TradingOrder,
};
