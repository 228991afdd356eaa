pub mod builder;
pub mod executor;
pub mod monitors;

pub use builder::{build_order, select_strategy, split_lots, ExecutionStrategy, MAX_TP_LEVELS};
pub use executor::{DispatchPlan, ExecutionOutcome, Executor};
