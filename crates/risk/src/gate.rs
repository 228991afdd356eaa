//! Layered risk gate.
//!
//! Layers run in fixed order, cheapest first, short-circuiting on the first
//! rejection: emergency stop, account daily ceilings, equity drawdown with
//! recovery mode, margin headroom, provider ceilings, pair ceilings,
//! frequency throttles, then the optional news gate. The only internal
//! mutation outside evaluation itself is the reservation bookkeeping that
//! keeps two back-to-back approvals from both consuming a ceiling slot
//! only one can have.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use sigpilot_core::settings::RiskSettings;
use sigpilot_core::types::{AccountState, ParsedSignal};

use crate::news::NewsGate;
use crate::window::SlidingWindow;

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Approved {
        /// Effective lot after provider clamping.
        lot_size: Decimal,
        /// True when the requested lot was clamped to a provider cap.
        clamped: bool,
    },
    Rejected {
        reason: String,
    },
}

impl GateDecision {
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

#[derive(Debug, Clone)]
struct RecoveryState {
    /// Equity must reach this before trading resumes.
    target: Decimal,
}

#[derive(Debug, Default)]
struct ProviderDay {
    realized_pnl: Decimal,
}

/// Approvals handed out but not yet visible in the account's open-order
/// view. Released on commit (trade recorded) or explicit release (placement
/// failed).
#[derive(Debug, Default)]
struct Reservations {
    provider_slots: HashMap<String, u32>,
    pair_lots: HashMap<String, Decimal>,
}

pub struct RiskGate {
    settings: RiskSettings,
    news: Option<Arc<dyn NewsGate>>,
    peak_equity: Decimal,
    recovery: Option<RecoveryState>,
    day: Option<NaiveDate>,
    provider_day: HashMap<String, ProviderDay>,
    pair_day_trades: HashMap<String, u32>,
    global_minute: SlidingWindow,
    global_hour: SlidingWindow,
    provider_hour: HashMap<String, SlidingWindow>,
    pair_hour: HashMap<String, SlidingWindow>,
    reservations: Reservations,
}

impl RiskGate {
    #[must_use]
    pub fn new(settings: RiskSettings) -> Self {
        Self {
            settings,
            news: None,
            peak_equity: Decimal::ZERO,
            recovery: None,
            day: None,
            provider_day: HashMap::new(),
            pair_day_trades: HashMap::new(),
            global_minute: SlidingWindow::minutes(1),
            global_hour: SlidingWindow::hours(1),
            provider_hour: HashMap::new(),
            pair_hour: HashMap::new(),
            reservations: Reservations::default(),
        }
    }

    #[must_use]
    pub fn with_news_gate(mut self, news: Arc<dyn NewsGate>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn update_settings(&mut self, settings: RiskSettings) {
        self.settings = settings;
    }

    pub fn set_emergency_stop(&mut self, stop: bool) {
        if stop {
            warn!("Emergency stop engaged, all signals will be rejected");
        } else {
            info!("Emergency stop released");
        }
        self.settings.emergency_stop = stop;
    }

    #[must_use]
    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// Evaluates a signal against every layer.
    ///
    /// An approval reserves a provider slot and the pair lots until the
    /// caller either commits the trade or releases the reservation.
    pub async fn evaluate(
        &mut self,
        signal: &ParsedSignal,
        account: &AccountState,
        now: DateTime<Utc>,
    ) -> GateDecision {
        self.rollover_day(now);

        // Layer 1: kill switch.
        if self.settings.emergency_stop {
            return rejected("emergency stop active");
        }

        // Layer 2: account daily ceilings.
        if let Some(reason) = self.check_daily_limits(account) {
            return rejected(&reason);
        }

        // Layer 3: equity drawdown against the peak-equity high-water mark.
        if let Some(reason) = self.check_drawdown(account) {
            return rejected(&reason);
        }

        // Layer 4: margin headroom above stop-out.
        if let Some(level) = account.margin_level {
            if level < self.settings.min_margin_level {
                return rejected(&format!(
                    "margin level {level:.0}% below minimum {:.0}%",
                    self.settings.min_margin_level
                ));
            }
        }

        let pair = signal.pair.as_deref().unwrap_or_default();
        let provider = signal.provider_id.as_str();
        let requested_lot = signal.lot_size.unwrap_or(self.settings.default_lot_size);

        // Layer 5: provider ceilings. Lot requests over the cap clamp.
        let mut lot = requested_lot;
        let mut clamped = false;
        if let Some(ps) = self.settings.providers.get(provider) {
            if let Some(max_loss) = ps.max_daily_loss {
                let realized = self
                    .provider_day
                    .get(provider)
                    .map_or(Decimal::ZERO, |d| d.realized_pnl);
                if realized <= -max_loss {
                    return rejected(&format!("provider {provider} daily loss limit reached"));
                }
            }
            if let Some(max_concurrent) = ps.max_concurrent_trades {
                let open = account.provider_open_count(provider)
                    + self.reserved_provider_slots(provider);
                if open >= max_concurrent as usize {
                    return rejected(&format!(
                        "provider {provider} concurrent trade limit ({max_concurrent}) reached"
                    ));
                }
            }
            if let Some(max_lot) = ps.max_lot_size {
                if lot > max_lot {
                    info!(provider, requested = %lot, cap = %max_lot, "Clamping lot to provider cap");
                    lot = max_lot;
                    clamped = true;
                }
            }
        }

        // Layer 6: pair ceilings.
        if let Some(reason) = self.check_pair_limits(pair, lot, account) {
            return rejected(&reason);
        }

        // Layer 7: frequency throttles over sliding windows.
        if let Some(reason) = self.check_frequency(provider, pair, now) {
            return rejected(&reason);
        }

        // Layer 8: news blackout, when enabled and wired.
        if self.settings.news_filter_enabled {
            if let Some(news) = &self.news {
                let verdict = news.should_block(pair, now).await;
                if verdict.blocked {
                    return rejected(&format!("news blackout: {}", verdict.reason));
                }
            }
        }

        *self
            .reservations
            .provider_slots
            .entry(provider.to_string())
            .or_insert(0) += 1;
        *self
            .reservations
            .pair_lots
            .entry(pair.to_string())
            .or_insert(Decimal::ZERO) += lot;

        GateDecision::Approved {
            lot_size: lot,
            clamped,
        }
    }

    /// Records an executed trade: consumes the reservation and feeds the
    /// sliding windows and day counters.
    pub fn commit_trade(&mut self, provider: &str, pair: &str, lot: Decimal, now: DateTime<Utc>) {
        self.release(provider, pair, lot);
        self.global_minute.record(now);
        self.global_hour.record(now);
        self.provider_hour
            .entry(provider.to_string())
            .or_insert_with(|| SlidingWindow::hours(1))
            .record(now);
        self.pair_hour
            .entry(pair.to_string())
            .or_insert_with(|| SlidingWindow::hours(1))
            .record(now);
        *self.pair_day_trades.entry(pair.to_string()).or_insert(0) += 1;
    }

    /// Drops a reservation after a failed placement.
    pub fn release(&mut self, provider: &str, pair: &str, lot: Decimal) {
        if let Some(slots) = self.reservations.provider_slots.get_mut(provider) {
            *slots = slots.saturating_sub(1);
        }
        if let Some(lots) = self.reservations.pair_lots.get_mut(pair) {
            *lots = (*lots - lot).max(Decimal::ZERO);
        }
    }

    /// Feeds a provider's realized result into its daily-loss ledger.
    pub fn record_closed_trade(&mut self, provider: &str, pnl: Decimal) {
        self.provider_day
            .entry(provider.to_string())
            .or_default()
            .realized_pnl += pnl;
    }

    fn reserved_provider_slots(&self, provider: &str) -> usize {
        self.reservations
            .provider_slots
            .get(provider)
            .copied()
            .unwrap_or(0) as usize
    }

    fn reserved_pair_lots(&self, pair: &str) -> Decimal {
        self.reservations
            .pair_lots
            .get(pair)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn check_daily_limits(&self, account: &AccountState) -> Option<String> {
        if account.daily_pnl < Decimal::ZERO {
            let loss = -account.daily_pnl;
            if self.settings.max_daily_loss_amount > Decimal::ZERO
                && loss >= self.settings.max_daily_loss_amount
            {
                return Some(format!("daily loss limit reached ({loss})"));
            }
            if account.balance > Decimal::ZERO {
                let loss_pct: f64 = (loss / account.balance * Decimal::ONE_HUNDRED)
                    .try_into()
                    .unwrap_or(0.0);
                if loss_pct >= self.settings.max_daily_loss_percent {
                    return Some(format!("daily loss {loss_pct:.1}% over limit"));
                }
            }
        }
        if account.daily_trades >= self.settings.max_daily_trades {
            return Some(format!(
                "daily trade limit ({}) reached",
                self.settings.max_daily_trades
            ));
        }
        None
    }

    fn check_drawdown(&mut self, account: &AccountState) -> Option<String> {
        if account.equity > self.peak_equity {
            self.peak_equity = account.equity;
        }

        if let Some(recovery) = &self.recovery {
            if account.equity >= recovery.target {
                info!(equity = %account.equity, "Equity recovered, resuming trading");
                self.recovery = None;
                self.peak_equity = account.equity;
                return None;
            }
            return Some(format!(
                "drawdown recovery in progress (equity {} / target {})",
                account.equity, recovery.target
            ));
        }

        if self.peak_equity > Decimal::ZERO {
            let dd_pct: f64 = ((self.peak_equity - account.equity) / self.peak_equity
                * Decimal::ONE_HUNDRED)
                .try_into()
                .unwrap_or(0.0);
            if dd_pct >= self.settings.max_drawdown_percent {
                let factor = 1.0 + self.settings.recovery_percent / 100.0;
                let target = mul_f64(account.equity, factor);
                warn!(
                    drawdown_pct = dd_pct,
                    target = %target,
                    "Drawdown limit breached, entering recovery mode"
                );
                self.recovery = Some(RecoveryState { target });
                return Some(format!("equity drawdown {dd_pct:.1}% over limit"));
            }
        }
        None
    }

    fn check_pair_limits(
        &mut self,
        pair: &str,
        lot: Decimal,
        account: &AccountState,
    ) -> Option<String> {
        let Some(ps) = self.settings.pairs.get(pair) else {
            return None;
        };
        if let Some(max_exposure) = ps.max_exposure_lots {
            let exposure = account.pair_exposure(pair) + self.reserved_pair_lots(pair) + lot;
            if exposure > max_exposure {
                return Some(format!(
                    "pair {pair} exposure {exposure} over cap {max_exposure}"
                ));
            }
        }
        if let Some(max_trades) = ps.max_daily_trades {
            let today = self.pair_day_trades.get(pair).copied().unwrap_or(0);
            if today >= max_trades {
                return Some(format!("pair {pair} daily trade limit ({max_trades}) reached"));
            }
        }
        None
    }

    fn check_frequency(&mut self, provider: &str, pair: &str, now: DateTime<Utc>) -> Option<String> {
        if self.global_minute.count(now) >= self.settings.max_signals_per_minute as usize {
            return Some("signal frequency limit (per minute) reached".to_string());
        }
        if self.global_hour.count(now) >= self.settings.max_signals_per_hour as usize {
            return Some("signal frequency limit (per hour) reached".to_string());
        }
        if let Some(cap) = self
            .settings
            .providers
            .get(provider)
            .and_then(|p| p.max_signals_per_hour)
        {
            let count = self
                .provider_hour
                .entry(provider.to_string())
                .or_insert_with(|| SlidingWindow::hours(1))
                .count(now);
            if count >= cap as usize {
                return Some(format!("provider {provider} hourly signal limit reached"));
            }
        }
        if let Some(cap) = self
            .settings
            .pairs
            .get(pair)
            .and_then(|p| p.max_signals_per_hour)
        {
            let count = self
                .pair_hour
                .entry(pair.to_string())
                .or_insert_with(|| SlidingWindow::hours(1))
                .count(now);
            if count >= cap as usize {
                return Some(format!("pair {pair} hourly signal limit reached"));
            }
        }
        None
    }

    fn rollover_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.provider_day.clear();
            self.pair_day_trades.clear();
        }
    }
}

fn rejected(reason: &str) -> GateDecision {
    info!(reason, "Signal rejected by risk gate");
    GateDecision::Rejected {
        reason: reason.to_string(),
    }
}

/// Decimal × f64 without leaving decimal space for the integral part.
fn mul_f64(value: Decimal, factor: f64) -> Decimal {
    let f: f64 = value.try_into().unwrap_or(0.0);
    Decimal::try_from(f * factor).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sigpilot_core::settings::{PairRiskSettings, ProviderRiskSettings};
    use sigpilot_core::types::{Confidence, SignalType, TradeAction};
    use uuid::Uuid;

    fn signal(provider: &str, pair: &str, lot: Option<Decimal>) -> ParsedSignal {
        ParsedSignal {
            signal_id: Uuid::new_v4(),
            original_text: String::new(),
            signal_type: SignalType::MarketOrder,
            confidence: Confidence::High,
            pair: Some(pair.to_string()),
            action: Some(TradeAction::Buy),
            entry_price: Some(dec!(1.0850)),
            stop_loss: Some(dec!(1.0820)),
            take_profits: vec![dec!(1.0900)],
            lot_size: lot,
            risk_percent: None,
            order_type_hint: None,
            provider_id: provider.to_string(),
            message_id: None,
            edit_sequence: 0,
            field_changes: Vec::new(),
            parsed_at: Utc::now(),
        }
    }

    fn healthy_account() -> AccountState {
        AccountState {
            balance: dec!(10000),
            equity: dec!(10000),
            margin_level: Some(1000.0),
            daily_pnl: Decimal::ZERO,
            daily_trades: 0,
            open_orders: Vec::new(),
            updated_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn healthy_signal_is_approved() {
        let mut gate = RiskGate::new(RiskSettings::default());
        let decision = gate
            .evaluate(&signal("alpha", "EURUSD", None), &healthy_account(), Utc::now())
            .await;
        assert!(decision.is_approved());
    }

    #[tokio::test]
    async fn emergency_stop_rejects_first() {
        let mut settings = RiskSettings::default();
        settings.emergency_stop = true;
        let mut gate = RiskGate::new(settings);
        let decision = gate
            .evaluate(&signal("alpha", "EURUSD", None), &healthy_account(), Utc::now())
            .await;
        match decision {
            GateDecision::Rejected { reason } => assert!(reason.contains("emergency")),
            GateDecision::Approved { .. } => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn daily_loss_amount_blocks_with_reason() {
        let mut settings = RiskSettings::default();
        settings.max_daily_loss_amount = dec!(200);
        let mut gate = RiskGate::new(settings);
        let mut account = healthy_account();
        account.daily_pnl = dec!(-250);

        let decision = gate
            .evaluate(&signal("alpha", "EURUSD", None), &account, Utc::now())
            .await;
        match decision {
            GateDecision::Rejected { reason } => assert!(reason.contains("daily loss")),
            GateDecision::Approved { .. } => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn drawdown_blocks_until_recovery_target() {
        let mut settings = RiskSettings::default();
        settings.max_drawdown_percent = 10.0;
        settings.recovery_percent = 2.0;
        let mut gate = RiskGate::new(settings);
        let sig = signal("alpha", "EURUSD", None);

        let mut account = healthy_account();
        account.equity = dec!(10000);
        assert!(gate.evaluate(&sig, &account, Utc::now()).await.is_approved());

        // 15% drawdown trips the limit and enters recovery.
        account.equity = dec!(8500);
        assert!(!gate.evaluate(&sig, &account, Utc::now()).await.is_approved());

        // Partial recovery is still blocked.
        account.equity = dec!(8600);
        assert!(!gate.evaluate(&sig, &account, Utc::now()).await.is_approved());

        // 2% above the drawdown low resumes trading.
        account.equity = dec!(8700);
        assert!(gate.evaluate(&sig, &account, Utc::now()).await.is_approved());
    }

    #[tokio::test]
    async fn provider_lot_cap_clamps_not_rejects() {
        let mut settings = RiskSettings::default();
        settings.providers.insert(
            "alpha".to_string(),
            ProviderRiskSettings {
                max_lot_size: Some(dec!(0.10)),
                ..ProviderRiskSettings::default()
            },
        );
        let mut gate = RiskGate::new(settings);

        let decision = gate
            .evaluate(
                &signal("alpha", "EURUSD", Some(dec!(0.50))),
                &healthy_account(),
                Utc::now(),
            )
            .await;
        match decision {
            GateDecision::Approved { lot_size, clamped } => {
                assert_eq!(lot_size, dec!(0.10));
                assert!(clamped);
            }
            GateDecision::Rejected { .. } => panic!("expected clamped approval"),
        }
    }

    #[tokio::test]
    async fn back_to_back_evaluations_cannot_both_take_last_slot() {
        let mut settings = RiskSettings::default();
        settings.providers.insert(
            "alpha".to_string(),
            ProviderRiskSettings {
                max_concurrent_trades: Some(1),
                ..ProviderRiskSettings::default()
            },
        );
        let mut gate = RiskGate::new(settings);
        let account = healthy_account();
        let sig = signal("alpha", "EURUSD", None);

        let first = gate.evaluate(&sig, &account, Utc::now()).await;
        let second = gate.evaluate(&sig, &account, Utc::now()).await;
        assert!(first.is_approved());
        assert!(!second.is_approved());

        // Releasing the failed placement frees the slot again.
        gate.release("alpha", "EURUSD", dec!(0.01));
        let third = gate.evaluate(&sig, &account, Utc::now()).await;
        assert!(third.is_approved());
    }

    #[tokio::test]
    async fn pair_exposure_cap_counts_reservations() {
        let mut settings = RiskSettings::default();
        settings.default_lot_size = dec!(0.30);
        settings.pairs.insert(
            "EURUSD".to_string(),
            PairRiskSettings {
                max_exposure_lots: Some(dec!(0.50)),
                ..PairRiskSettings::default()
            },
        );
        let mut gate = RiskGate::new(settings);
        let account = healthy_account();
        let sig = signal("alpha", "EURUSD", None);

        assert!(gate.evaluate(&sig, &account, Utc::now()).await.is_approved());
        // 0.30 reserved + 0.30 requested > 0.50 cap.
        assert!(!gate.evaluate(&sig, &account, Utc::now()).await.is_approved());
    }

    #[tokio::test]
    async fn frequency_throttle_counts_committed_trades() {
        let mut settings = RiskSettings::default();
        settings.max_signals_per_minute = 2;
        let mut gate = RiskGate::new(settings);
        let account = healthy_account();
        let now = Utc::now();

        for _ in 0..2 {
            let sig = signal("alpha", "EURUSD", None);
            assert!(gate.evaluate(&sig, &account, now).await.is_approved());
            gate.commit_trade("alpha", "EURUSD", dec!(0.01), now);
        }

        let decision = gate.evaluate(&signal("alpha", "EURUSD", None), &account, now).await;
        match decision {
            GateDecision::Rejected { reason } => assert!(reason.contains("per minute")),
            GateDecision::Approved { .. } => panic!("expected throttle rejection"),
        }
    }

    struct AlwaysBlock;

    #[async_trait]
    impl NewsGate for AlwaysBlock {
        async fn should_block(&self, _pair: &str, _now: DateTime<Utc>) -> crate::news::NewsVerdict {
            crate::news::NewsVerdict {
                blocked: true,
                reason: "NFP in 10 minutes".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn news_gate_blocks_when_enabled() {
        let mut settings = RiskSettings::default();
        settings.news_filter_enabled = true;
        let mut gate =
            RiskGate::new(settings).with_news_gate(std::sync::Arc::new(AlwaysBlock));

        let decision = gate
            .evaluate(&signal("alpha", "EURUSD", None), &healthy_account(), Utc::now())
            .await;
        match decision {
            GateDecision::Rejected { reason } => assert!(reason.contains("news")),
            GateDecision::Approved { .. } => panic!("expected news rejection"),
        }
    }
}
