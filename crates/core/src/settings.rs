//! Long-lived pipeline settings.
//!
//! Created once at process start from [`crate::config::AppConfig`] and
//! mutated only through the orchestrator's administrative calls. A provider
//! or pair with no explicit override inherits the account-level defaults:
//! absence of an override means unrestricted at that layer, and the account
//! layer is the ultimate ceiling.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Account-level risk ceilings plus per-provider and per-pair overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Hard kill switch checked before everything else.
    #[serde(default)]
    pub emergency_stop: bool,
    #[serde(default = "default_max_daily_loss_percent")]
    pub max_daily_loss_percent: f64,
    /// Absolute ceiling in account currency. Zero disables the check.
    #[serde(default)]
    pub max_daily_loss_amount: Decimal,
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    /// Maximum equity drawdown from the peak before trading is blocked.
    #[serde(default = "default_max_drawdown_percent")]
    pub max_drawdown_percent: f64,
    /// Equity must recover by this much from the drawdown low before
    /// trading resumes.
    #[serde(default = "default_recovery_percent")]
    pub recovery_percent: f64,
    /// Minimum margin level (percent) that must remain above stop-out.
    #[serde(default = "default_min_margin_level")]
    pub min_margin_level: f64,
    #[serde(default = "default_lot_size")]
    pub default_lot_size: Decimal,
    #[serde(default = "default_max_signals_per_minute")]
    pub max_signals_per_minute: u32,
    #[serde(default = "default_max_signals_per_hour")]
    pub max_signals_per_hour: u32,
    /// Consult the news gate before approving, when a gate is wired in.
    #[serde(default)]
    pub news_filter_enabled: bool,
    #[serde(default)]
    pub providers: HashMap<String, ProviderRiskSettings>,
    #[serde(default)]
    pub pairs: HashMap<String, PairRiskSettings>,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            emergency_stop: false,
            max_daily_loss_percent: default_max_daily_loss_percent(),
            max_daily_loss_amount: Decimal::ZERO,
            max_daily_trades: default_max_daily_trades(),
            max_drawdown_percent: default_max_drawdown_percent(),
            recovery_percent: default_recovery_percent(),
            min_margin_level: default_min_margin_level(),
            default_lot_size: default_lot_size(),
            max_signals_per_minute: default_max_signals_per_minute(),
            max_signals_per_hour: default_max_signals_per_hour(),
            news_filter_enabled: false,
            providers: HashMap::new(),
            pairs: HashMap::new(),
        }
    }
}

fn default_max_daily_loss_percent() -> f64 {
    5.0
}

const fn default_max_daily_trades() -> u32 {
    20
}

fn default_max_drawdown_percent() -> f64 {
    10.0
}

fn default_recovery_percent() -> f64 {
    2.0
}

fn default_min_margin_level() -> f64 {
    200.0
}

fn default_lot_size() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

const fn default_max_signals_per_minute() -> u32 {
    5
}

const fn default_max_signals_per_hour() -> u32 {
    30
}

/// Per-provider ceilings. `None` means unrestricted at this layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderRiskSettings {
    pub max_daily_loss: Option<Decimal>,
    pub max_concurrent_trades: Option<u32>,
    /// Lot requests above this are clamped, not rejected.
    pub max_lot_size: Option<Decimal>,
    pub max_signals_per_hour: Option<u32>,
}

/// Per-pair ceilings. `None` means unrestricted at this layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairRiskSettings {
    /// Cap on cumulative open lots for the pair.
    pub max_exposure_lots: Option<Decimal>,
    pub max_daily_trades: Option<u32>,
    pub max_signals_per_hour: Option<u32>,
}

/// Toggles and bounds for the anti-detection transforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealthSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub delay_enabled: bool,
    #[serde(default = "default_delay_min_secs")]
    pub delay_min_secs: u64,
    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: u64,
    /// Global ceiling for any sampled delay.
    #[serde(default = "default_delay_cap_secs")]
    pub delay_cap_secs: u64,
    #[serde(default)]
    pub lot_jitter_enabled: bool,
    /// Jitter amplitude: lot is scaled by `1 ± pct/100`.
    #[serde(default = "default_lot_jitter_percent")]
    pub lot_jitter_percent: f64,
    #[serde(default)]
    pub exposure_clamp_enabled: bool,
    /// Per-pair cap on cumulative open lots after this order.
    #[serde(default = "default_max_pair_exposure_lots")]
    pub max_pair_exposure_lots: Decimal,
    /// Strip the human-readable comment and randomize the magic number.
    #[serde(default)]
    pub mask_metadata: bool,
    /// Place the order naked and attach SL/TP after a second delay.
    #[serde(default)]
    pub defer_sltp: bool,
    #[serde(default = "default_sltp_delay_max_secs")]
    pub sltp_delay_max_secs: u64,
    /// Every N real trades, emit a small opposite-direction decoy on a
    /// different pair. Zero disables decoys.
    #[serde(default)]
    pub decoy_every_n_trades: u32,
    #[serde(default = "default_decoy_lot")]
    pub decoy_lot: Decimal,
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_enabled: false,
            delay_min_secs: default_delay_min_secs(),
            delay_max_secs: default_delay_max_secs(),
            delay_cap_secs: default_delay_cap_secs(),
            lot_jitter_enabled: false,
            lot_jitter_percent: default_lot_jitter_percent(),
            exposure_clamp_enabled: false,
            max_pair_exposure_lots: default_max_pair_exposure_lots(),
            mask_metadata: false,
            defer_sltp: false,
            sltp_delay_max_secs: default_sltp_delay_max_secs(),
            decoy_every_n_trades: 0,
            decoy_lot: default_decoy_lot(),
        }
    }
}

const fn default_delay_min_secs() -> u64 {
    2
}

const fn default_delay_max_secs() -> u64 {
    15
}

const fn default_delay_cap_secs() -> u64 {
    60
}

fn default_lot_jitter_percent() -> f64 {
    10.0
}

fn default_max_pair_exposure_lots() -> Decimal {
    Decimal::ONE
}

const fn default_sltp_delay_max_secs() -> u64 {
    10
}

fn default_decoy_lot() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// Execution-side knobs: smart entry, trailing, expiry, broker quantization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub smart_entry_enabled: bool,
    /// Maximum acceptable spread, in pips.
    #[serde(default = "default_max_spread_pips")]
    pub max_spread_pips: f64,
    /// Maximum |market − requested entry| deviation, in pips.
    #[serde(default = "default_max_deviation_pips")]
    pub max_deviation_pips: f64,
    #[serde(default = "default_smart_entry_timeout_secs")]
    pub smart_entry_timeout_secs: u64,
    #[serde(default)]
    pub trailing_enabled: bool,
    #[serde(default = "default_trailing_distance_pips")]
    pub trailing_distance_pips: f64,
    #[serde(default = "default_pending_expiry_hours")]
    pub pending_expiry_hours: u64,
    #[serde(default = "default_min_lot")]
    pub min_lot: Decimal,
    #[serde(default = "default_lot_step")]
    pub lot_step: Decimal,
    /// Apply SL/TP changes from message edits to live orders.
    #[serde(default)]
    pub apply_edits: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            smart_entry_enabled: false,
            max_spread_pips: default_max_spread_pips(),
            max_deviation_pips: default_max_deviation_pips(),
            smart_entry_timeout_secs: default_smart_entry_timeout_secs(),
            trailing_enabled: false,
            trailing_distance_pips: default_trailing_distance_pips(),
            pending_expiry_hours: default_pending_expiry_hours(),
            min_lot: default_min_lot(),
            lot_step: default_lot_step(),
            apply_edits: false,
        }
    }
}

fn default_max_spread_pips() -> f64 {
    3.0
}

fn default_max_deviation_pips() -> f64 {
    5.0
}

const fn default_smart_entry_timeout_secs() -> u64 {
    300
}

fn default_trailing_distance_pips() -> f64 {
    20.0
}

const fn default_pending_expiry_hours() -> u64 {
    24
}

fn default_min_lot() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_lot_step() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_settings_defaults_from_empty_object() {
        let settings: RiskSettings = serde_json::from_str("{}").unwrap();
        assert!(!settings.emergency_stop);
        assert!((settings.max_daily_loss_percent - 5.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_daily_trades, 20);
        assert!(settings.providers.is_empty());
    }

    #[test]
    fn execution_settings_defaults_from_empty_object() {
        let settings: ExecutionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.smart_entry_timeout_secs, 300);
        assert_eq!(settings.pending_expiry_hours, 24);
        assert!(!settings.apply_edits);
    }

    #[test]
    fn provider_override_absence_means_unrestricted() {
        let settings = ProviderRiskSettings::default();
        assert!(settings.max_lot_size.is_none());
        assert!(settings.max_concurrent_trades.is_none());
    }
}
