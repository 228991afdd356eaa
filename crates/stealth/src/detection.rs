//! Clone-detection diagnostic.
//!
//! Inspects recent trade history the way prop-firm surveillance would:
//! low pair diversity, repeated lot sizes, and metronomic timing all make
//! an account look like a signal copier. The report recommends stronger
//! randomization when patterns show.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

use sigpilot_core::types::TradeRecord;

/// How exposed the account looks to pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CloneRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct CloneReport {
    pub risk: CloneRisk,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Minimum history size before diversity/lot heuristics apply.
const MIN_TRADES: usize = 10;
/// Minimum history size before the timing heuristic applies.
const MIN_INTERVALS: usize = 5;

/// Analyzes recent trades for copy-trading fingerprints.
#[must_use]
pub fn clone_detection_report(history: &[TradeRecord]) -> CloneReport {
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();

    if history.len() >= MIN_TRADES {
        let mut pairs: HashMap<&str, usize> = HashMap::new();
        for trade in history {
            *pairs.entry(trade.pair.as_str()).or_insert(0) += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let diversity = pairs.len() as f64 / history.len() as f64;
        if diversity < 0.3 {
            findings.push(format!(
                "low pair diversity: {} pairs across {} trades",
                pairs.len(),
                history.len()
            ));
            recommendations.push("enable decoy trades on additional pairs".to_string());
        }

        let mut lots: HashMap<Decimal, usize> = HashMap::new();
        for trade in history {
            *lots.entry(trade.lot_size).or_insert(0) += 1;
        }
        if let Some((lot, count)) = lots.iter().max_by_key(|(_, c)| **c) {
            #[allow(clippy::cast_precision_loss)]
            let share = *count as f64 / history.len() as f64;
            if share > 0.6 {
                findings.push(format!(
                    "repeated lot size: {lot} used in {:.0}% of trades",
                    share * 100.0
                ));
                recommendations.push("enable lot randomization or raise its percentage".to_string());
            }
        }
    }

    let intervals: Vec<f64> = history
        .windows(2)
        .map(|w| (w[1].executed_at - w[0].executed_at).num_seconds().abs() as f64)
        .collect();
    if intervals.len() >= MIN_INTERVALS {
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        if mean > 0.0 {
            let variance = intervals
                .iter()
                .map(|i| (i - mean).powi(2))
                .sum::<f64>()
                / intervals.len() as f64;
            let cv = variance.sqrt() / mean;
            if cv < 0.2 {
                findings.push(format!(
                    "regular trade timing: interval variation {:.0}% of mean",
                    cv * 100.0
                ));
                recommendations.push("enable or widen the execution delay range".to_string());
            }
        }
    }

    let risk = match findings.len() {
        0 => CloneRisk::Low,
        1 => CloneRisk::Medium,
        _ => CloneRisk::High,
    };

    debug!(?risk, findings = findings.len(), "Clone detection report");
    CloneReport {
        risk,
        findings,
        recommendations,
    }
}
