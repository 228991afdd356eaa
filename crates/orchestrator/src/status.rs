//! System status snapshot published over a watch channel.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters per provider, for the snapshot surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderCounters {
    pub executed: u64,
    pub blocked: u64,
}

/// Rolling pipeline counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub executed: u64,
    pub blocked: u64,
    pub invalid: u64,
    pub errors: u64,
    pub commands: u64,
    pub decoys: u64,
    pub edits_seen: u64,
    pub per_provider: HashMap<String, ProviderCounters>,
}

impl PipelineStats {
    pub fn record_executed(&mut self, provider_id: &str) {
        self.executed += 1;
        self.per_provider
            .entry(provider_id.to_string())
            .or_default()
            .executed += 1;
    }

    pub fn record_blocked(&mut self, provider_id: &str) {
        self.blocked += 1;
        self.per_provider
            .entry(provider_id.to_string())
            .or_default()
            .blocked += 1;
    }
}

/// Read-only view served to persistence/UI collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub active_orders: usize,
    pub stats: PipelineStats,
    pub emergency_stop: bool,
    /// Clone-detection risk over recent trades: "low", "medium", "high".
    pub clone_risk: String,
    pub account_equity: rust_decimal::Decimal,
    pub last_update: Option<DateTime<Utc>>,
}
