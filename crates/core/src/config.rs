use serde::{Deserialize, Serialize};

use crate::settings::{ExecutionSettings, RiskSettings, StealthSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub stealth: StealthSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9_090,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Capacity of the inbound event queue.
    pub queue_capacity: usize,
    pub account_refresh_secs: u64,
    pub stats_rollup_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            account_refresh_secs: 10,
            stats_rollup_secs: 30,
        }
    }
}
