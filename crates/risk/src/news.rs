//! News/time-window gate seam.
//!
//! The economic-calendar source is an external collaborator; the gate only
//! consumes a yes/no answer per pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Decision from the news collaborator.
#[derive(Debug, Clone)]
pub struct NewsVerdict {
    pub blocked: bool,
    pub reason: String,
}

#[async_trait]
pub trait NewsGate: Send + Sync {
    async fn should_block(&self, pair: &str, now: DateTime<Utc>) -> NewsVerdict;
}

/// Gate that never blocks; used when no calendar source is wired in.
pub struct NoNews;

#[async_trait]
impl NewsGate for NoNews {
    async fn should_block(&self, _pair: &str, _now: DateTime<Utc>) -> NewsVerdict {
        NewsVerdict {
            blocked: false,
            reason: String::new(),
        }
    }
}
