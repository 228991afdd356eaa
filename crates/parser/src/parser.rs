//! Free-text signal parsing.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use sigpilot_core::types::{
    Confidence, FieldChange, OrderType, ParsedSignal, SignalType, TradeAction,
};

use crate::patterns;

/// How many parsed formats to remember per provider.
const FORMAT_SAMPLES_PER_PROVIDER: usize = 20;

/// Up to this many take-profit prices are kept from one message.
const MAX_TAKE_PROFITS: usize = 100;

/// Shape of one successfully parsed message, kept for lightweight adaptive
/// matching per provider. Not a trained model; just a rolling sample.
#[derive(Debug, Clone)]
pub struct FormatSample {
    pub labeled_entry: bool,
    pub labeled_sl: bool,
    pub tp_count: usize,
}

/// Aggregate view over a provider's recent formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatStats {
    pub samples: usize,
    /// Share of recent messages using explicit ENTRY/SL labels.
    pub labeled_ratio: f64,
    pub avg_tp_count: f64,
}

pub struct SignalParser {
    /// Previous parse per (provider, message id), for edit diffing.
    history: HashMap<(String, String), ParsedSignal>,
    provider_formats: HashMap<String, VecDeque<FormatSample>>,
}

impl Default for SignalParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
            provider_formats: HashMap::new(),
        }
    }

    /// Parses one message into a structured, confidence-scored signal.
    pub fn parse(
        &mut self,
        text: &str,
        provider_id: &str,
        message_id: Option<&str>,
    ) -> ParsedSignal {
        let signal = self.parse_inner(text, provider_id, 0, Vec::new());

        if let Some(message_id) = message_id {
            let mut stored = signal.clone();
            stored.message_id = Some(message_id.to_string());
            self.history
                .insert((provider_id.to_string(), message_id.to_string()), stored);
        }

        let mut signal = signal;
        signal.message_id = message_id.map(str::to_string);
        signal
    }

    /// Re-parses an edited message and stamps the field-level diff against
    /// the previously stored parse for the same message id.
    pub fn parse_edit(
        &mut self,
        text: &str,
        original_message_id: &str,
        provider_id: &str,
    ) -> ParsedSignal {
        let key = (provider_id.to_string(), original_message_id.to_string());
        let previous = self.history.get(&key).cloned();
        if previous.is_none() {
            debug!(
                provider_id,
                message_id = original_message_id,
                "Edit for unknown message, treating as first parse"
            );
        }
        let edit_sequence = previous.as_ref().map_or(0, |p| p.edit_sequence + 1);

        let mut signal = self.parse_inner(text, provider_id, edit_sequence, Vec::new());
        if let Some(prev) = &previous {
            signal.field_changes = diff_signals(prev, &signal);
        }
        signal.message_id = Some(original_message_id.to_string());
        self.history.insert(key, signal.clone());
        signal
    }

    /// Rolling format statistics for one provider.
    #[must_use]
    pub fn format_stats(&self, provider_id: &str) -> FormatStats {
        let Some(samples) = self.provider_formats.get(provider_id) else {
            return FormatStats::default();
        };
        if samples.is_empty() {
            return FormatStats::default();
        }
        let labeled = samples.iter().filter(|s| s.labeled_entry).count();
        let tp_total: usize = samples.iter().map(|s| s.tp_count).sum();
        #[allow(clippy::cast_precision_loss)]
        FormatStats {
            samples: samples.len(),
            labeled_ratio: labeled as f64 / samples.len() as f64,
            avg_tp_count: tp_total as f64 / samples.len() as f64,
        }
    }

    fn parse_inner(
        &mut self,
        text: &str,
        provider_id: &str,
        edit_sequence: u32,
        field_changes: Vec<FieldChange>,
    ) -> ParsedSignal {
        let signal_type = classify(text);
        let pair = patterns::extract_pair(text);
        let action = extract_action(text);
        let order_type_hint = extract_order_type_hint(text);

        let labeled_entry = first_decimal(&patterns::ENTRY_RE, text);
        let labeled_sl = first_decimal(&patterns::SL_RE, text);
        let mut take_profits = all_decimals(&patterns::TP_RE, text);
        take_profits.truncate(MAX_TAKE_PROFITS);
        let lot_size = first_decimal(&patterns::LOT_RE, text);
        let risk_percent =
            first_decimal(&patterns::RISK_RE, text).and_then(|d| d.to_string().parse().ok());

        // Positional fallback for providers that post bare numbers:
        // the first three unlabeled numbers are entry, SL, TP.
        let (entry_price, stop_loss) =
            if labeled_entry.is_none() && labeled_sl.is_none() && take_profits.is_empty() {
                let numbers = positional_numbers(text, lot_size, risk_percent);
                let mut it = numbers.into_iter();
                let entry = it.next();
                let sl = it.next();
                if let Some(tp) = it.next() {
                    take_profits.push(tp);
                }
                (entry, sl)
            } else {
                (labeled_entry, labeled_sl)
            };

        let confidence = score_confidence(&pair, &action, &entry_price);

        let signal = ParsedSignal {
            signal_id: Uuid::new_v4(),
            original_text: text.to_string(),
            signal_type,
            confidence,
            pair,
            action,
            entry_price,
            stop_loss,
            take_profits,
            lot_size,
            risk_percent,
            order_type_hint,
            provider_id: provider_id.to_string(),
            message_id: None,
            edit_sequence,
            field_changes,
            parsed_at: Utc::now(),
        };

        if signal.is_actionable() {
            self.record_format(provider_id, &signal, labeled_entry.is_some());
            info!(
                provider_id,
                signal_id = %signal.signal_id,
                ?signal_type,
                ?confidence,
                pair = signal.pair.as_deref().unwrap_or("-"),
                "Parsed signal"
            );
        } else {
            debug!(provider_id, text, "Unparseable message");
        }

        signal
    }

    fn record_format(&mut self, provider_id: &str, signal: &ParsedSignal, labeled_entry: bool) {
        let samples = self.provider_formats.entry(provider_id.to_string()).or_default();
        if samples.len() >= FORMAT_SAMPLES_PER_PROVIDER {
            samples.pop_front();
        }
        samples.push_back(FormatSample {
            labeled_entry,
            labeled_sl: signal.stop_loss.is_some(),
            tp_count: signal.take_profits.len(),
        });
    }
}

/// Keyword-family classification with fixed precedence.
fn classify(text: &str) -> SignalType {
    if patterns::COMMAND_RE.is_match(text) {
        SignalType::Command
    } else if patterns::MODIFICATION_RE.is_match(text) {
        SignalType::Modification
    } else if patterns::CLOSURE_RE.is_match(text) {
        SignalType::Closure
    } else if patterns::PENDING_RE.is_match(text) {
        SignalType::PendingOrder
    } else {
        SignalType::MarketOrder
    }
}

fn extract_action(text: &str) -> Option<TradeAction> {
    let buy = patterns::BUY_RE.is_match(text);
    let sell = patterns::SELL_RE.is_match(text);
    match (buy, sell) {
        (true, false) => Some(TradeAction::Buy),
        (false, true) => Some(TradeAction::Sell),
        // Both or neither: ambiguous, leave unset.
        _ => None,
    }
}

fn extract_order_type_hint(text: &str) -> Option<OrderType> {
    if patterns::BUY_LIMIT_RE.is_match(text) {
        Some(OrderType::BuyLimit)
    } else if patterns::SELL_LIMIT_RE.is_match(text) {
        Some(OrderType::SellLimit)
    } else if patterns::BUY_STOP_RE.is_match(text) {
        Some(OrderType::BuyStop)
    } else if patterns::SELL_STOP_RE.is_match(text) {
        Some(OrderType::SellStop)
    } else {
        None
    }
}

fn score_confidence(
    pair: &Option<String>,
    action: &Option<TradeAction>,
    entry: &Option<Decimal>,
) -> Confidence {
    if pair.is_none() || action.is_none() {
        return Confidence::Invalid;
    }
    if entry.is_some() {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

fn first_decimal(re: &regex::Regex, text: &str) -> Option<Decimal> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn all_decimals(re: &regex::Regex, text: &str) -> Vec<Decimal> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// All numbers in the text except lot/risk values and digits embedded in
/// symbol names, in order of appearance.
fn positional_numbers(
    text: &str,
    lot_size: Option<Decimal>,
    risk_percent: Option<f64>,
) -> Vec<Decimal> {
    let lot_str = lot_size.map(|d| d.to_string());
    let risk_str = risk_percent.map(|r| r.to_string());

    patterns::NUMBER_RE
        .find_iter(text)
        .filter(|m| {
            // Skip digits glued to letters (US30, TP1).
            let before = text[..m.start()].chars().next_back();
            !matches!(before, Some(c) if c.is_ascii_alphabetic())
        })
        .filter_map(|m| {
            let s = m.as_str();
            if lot_str.as_deref() == Some(s) || risk_str.as_deref() == Some(s) {
                None
            } else {
                s.parse::<Decimal>().ok()
            }
        })
        .collect()
}

/// Field-level diff between two parses of the same message.
#[must_use]
pub fn diff_signals(old: &ParsedSignal, new: &ParsedSignal) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    let mut push = |field: &str, old_v: Option<String>, new_v: Option<String>| {
        if old_v != new_v {
            changes.push(FieldChange {
                field: field.to_string(),
                old: old_v,
                new: new_v,
            });
        }
    };

    push("pair", old.pair.clone(), new.pair.clone());
    push(
        "action",
        old.action.map(|a| format!("{a:?}")),
        new.action.map(|a| format!("{a:?}")),
    );
    push(
        "entry_price",
        old.entry_price.map(|d| d.to_string()),
        new.entry_price.map(|d| d.to_string()),
    );
    push(
        "stop_loss",
        old.stop_loss.map(|d| d.to_string()),
        new.stop_loss.map(|d| d.to_string()),
    );
    push(
        "take_profits",
        Some(format!("{:?}", old.take_profits)),
        Some(format!("{:?}", new.take_profits)),
    );
    push(
        "lot_size",
        old.lot_size.map(|d| d.to_string()),
        new.lot_size.map(|d| d.to_string()),
    );

    changes
}
