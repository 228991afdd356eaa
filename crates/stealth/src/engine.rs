//! Stealth transforms over an approved signal.
//!
//! Each effect is independently toggleable and the transform is pure given
//! the RNG: the same signal, exposure, and random stream always produce the
//! same plan.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use sigpilot_core::settings::{ExecutionSettings, StealthSettings};
use sigpilot_core::types::{Confidence, ParsedSignal, SignalType, TradeAction};

/// Pairs decoy orders are drawn from.
const DECOY_PAIRS: &[&str] = &["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD"];

/// Output of the transform: the (possibly mutated) signal plus side-channel
/// instructions for the executor.
#[derive(Debug, Clone)]
pub struct StealthPlan {
    pub signal: ParsedSignal,
    /// Sleep before sending the order to the bridge.
    pub execution_delay: Option<Duration>,
    /// When set, place the order without SL/TP and attach them after this
    /// second delay, so the broker-side record never shows them at entry.
    pub sltp_delay: Option<Duration>,
    /// Drop the human-readable comment from the broker order.
    pub strip_comment: bool,
    /// Replacement magic number tag.
    pub magic_override: Option<u32>,
}

pub struct StealthEngine {
    settings: StealthSettings,
    trades_since_decoy: u32,
}

impl StealthEngine {
    #[must_use]
    pub fn new(settings: StealthSettings) -> Self {
        Self {
            settings,
            trades_since_decoy: 0,
        }
    }

    pub fn update_settings(&mut self, settings: StealthSettings) {
        self.settings = settings;
    }

    #[must_use]
    pub fn settings(&self) -> &StealthSettings {
        &self.settings
    }

    /// Applies the enabled transforms to one approved signal.
    ///
    /// `pair_exposure` is the cumulative open lot volume already held on
    /// the signal's pair, used by the exposure clamp.
    pub fn transform<R: Rng>(
        &self,
        mut signal: ParsedSignal,
        pair_exposure: Decimal,
        execution: &ExecutionSettings,
        rng: &mut R,
    ) -> StealthPlan {
        if !self.settings.enabled {
            return StealthPlan {
                signal,
                execution_delay: None,
                sltp_delay: None,
                strip_comment: false,
                magic_override: None,
            };
        }

        let execution_delay = self.sample_delay(rng);

        if let Some(lot) = signal.lot_size {
            let mut lot = lot;
            if self.settings.lot_jitter_enabled {
                lot = self.jitter_lot(lot, execution, rng);
            }
            if self.settings.exposure_clamp_enabled {
                lot = self.clamp_exposure(&signal, lot, pair_exposure, execution);
            }
            signal.lot_size = Some(lot);
        }

        let sltp_delay = if self.settings.defer_sltp {
            let max = self.settings.sltp_delay_max_secs.max(1);
            Some(Duration::from_secs(rng.gen_range(1..=max)))
        } else {
            None
        };

        let (strip_comment, magic_override) = if self.settings.mask_metadata {
            (true, Some(rng.gen_range(100_000..1_000_000)))
        } else {
            (false, None)
        };

        StealthPlan {
            signal,
            execution_delay,
            sltp_delay,
            strip_comment,
            magic_override,
        }
    }

    /// Counts one real trade; true when a decoy is due.
    pub fn register_real_trade(&mut self) -> bool {
        if self.settings.decoy_every_n_trades == 0 {
            return false;
        }
        self.trades_since_decoy += 1;
        if self.trades_since_decoy >= self.settings.decoy_every_n_trades {
            self.trades_since_decoy = 0;
            return true;
        }
        false
    }

    /// Builds a small opposite-direction order on a different pair, purely
    /// to break pattern-matching heuristics.
    pub fn build_decoy<R: Rng>(&self, real: &ParsedSignal, rng: &mut R) -> ParsedSignal {
        let candidates: Vec<&str> = DECOY_PAIRS
            .iter()
            .copied()
            .filter(|p| Some(*p) != real.pair.as_deref())
            .collect();
        let pair = candidates[rng.gen_range(0..candidates.len())];
        let action = real
            .action
            .map_or(TradeAction::Buy, TradeAction::opposite);

        debug!(pair, ?action, "Synthesizing decoy trade");
        ParsedSignal {
            signal_id: Uuid::new_v4(),
            original_text: String::new(),
            signal_type: SignalType::MarketOrder,
            confidence: Confidence::High,
            pair: Some(pair.to_string()),
            action: Some(action),
            entry_price: None,
            stop_loss: None,
            take_profits: Vec::new(),
            lot_size: Some(self.settings.decoy_lot),
            risk_percent: None,
            order_type_hint: None,
            provider_id: "stealth-decoy".to_string(),
            message_id: None,
            edit_sequence: 0,
            field_changes: Vec::new(),
            parsed_at: Utc::now(),
        }
    }

    fn sample_delay<R: Rng>(&self, rng: &mut R) -> Option<Duration> {
        if !self.settings.delay_enabled {
            return None;
        }
        let lo = self.settings.delay_min_secs;
        let hi = self.settings.delay_max_secs.max(lo);
        let sampled = rng.gen_range(lo..=hi).min(self.settings.delay_cap_secs);
        Some(Duration::from_secs(sampled))
    }

    fn jitter_lot<R: Rng>(
        &self,
        lot: Decimal,
        execution: &ExecutionSettings,
        rng: &mut R,
    ) -> Decimal {
        let amplitude = self.settings.lot_jitter_percent / 100.0;
        let factor = 1.0 + rng.gen_range(-amplitude..=amplitude);
        let jittered = mul_f64(lot, factor);
        round_to_step(jittered, execution.lot_step).max(execution.min_lot)
    }

    fn clamp_exposure(
        &self,
        signal: &ParsedSignal,
        lot: Decimal,
        pair_exposure: Decimal,
        execution: &ExecutionSettings,
    ) -> Decimal {
        let cap = self.settings.max_pair_exposure_lots;
        if pair_exposure + lot <= cap {
            return lot;
        }
        let remaining = (cap - pair_exposure).max(Decimal::ZERO);
        let clamped = floor_to_step(remaining, execution.lot_step);
        if clamped < execution.min_lot {
            warn!(
                pair = signal.pair.as_deref().unwrap_or("-"),
                exposure = %pair_exposure,
                cap = %cap,
                "Pair exposure cap exhausted, falling back to minimum lot"
            );
            return execution.min_lot;
        }
        debug!(
            pair = signal.pair.as_deref().unwrap_or("-"),
            requested = %lot,
            clamped = %clamped,
            "Clamping lot to pair exposure cap"
        );
        clamped
    }
}

fn mul_f64(value: Decimal, factor: f64) -> Decimal {
    let f: f64 = value.try_into().unwrap_or(0.0);
    Decimal::try_from(f * factor).unwrap_or(value)
}

fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).round() * step
}

fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}
