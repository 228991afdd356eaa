pub mod gate;
pub mod news;
pub mod window;

pub use gate::{GateDecision, RiskGate};
pub use news::{NewsGate, NewsVerdict, NoNews};
pub use window::SlidingWindow;
