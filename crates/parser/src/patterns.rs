//! Compiled pattern tables for signal classification and field extraction.
//!
//! Classification precedence: command tokens override modification tokens,
//! which override closure tokens, which override pending-order tokens;
//! anything else is a market order. Numeric extraction runs the labeled
//! families first and falls back to positional assignment for providers
//! that post bare numbers.

use once_cell::sync::Lazy;
use regex::Regex;

pub static COMMAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*(?:
            close\s+\d+(?:\.\d+)?\s*% |
            close\s+(?:all|half)\b |
            break\s*even\b | \bbe\b |
            trailing\b |
            cancel\b | delete\b |
            sl\s+to\s+\d | tp\s+to\s+\d
        )",
    )
    .expect("command pattern")
});

pub static MODIFICATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:move|modify|change|update|set)\b.*\b(?:sl|tp|stop|target|entry)\b")
        .expect("modification pattern")
});

pub static CLOSURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:close|exit|secure)\b").expect("closure pattern"));

pub static PENDING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:buy|sell)\s+(?:limit|stop)\b|\bpending\b").expect("pending pattern")
});

pub static BUY_LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbuy\s+limit\b").expect("buy limit pattern"));
pub static SELL_LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsell\s+limit\b").expect("sell limit pattern"));
pub static BUY_STOP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbuy\s+stop\b").expect("buy stop pattern"));
pub static SELL_STOP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsell\s+stop\b").expect("sell stop pattern"));

pub static BUY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:buy|long)\b").expect("buy pattern"));
pub static SELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:sell|short)\b").expect("sell pattern"));

/// Six-letter currency pairs, optionally slash-separated.
pub static PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-Z]{3})/?([A-Z]{3})\b").expect("pair pattern"));

pub static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:entry|enter|open)\b\s*:?\s*|@\s*)([0-9]+(?:\.[0-9]+)?)")
        .expect("entry pattern")
});

pub static SL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:sl|s/l|stop\s*loss|stoploss)\b\s*:?\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("stop loss pattern")
});

pub static TP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:tp|t/p|take\s*profit|target)\s*\d*\s*:?\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("take profit pattern")
});

pub static LOT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:lots?|lot\s*size|volume|size)\b\s*:?\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("lot pattern")
});

pub static RISK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\brisk\b\s*:?\s*([0-9]+(?:\.[0-9]+)?)\s*%").expect("risk pattern")
});

pub static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9]+(?:\.[0-9]+)?\b").expect("number pattern"));

/// Symbols recognized beyond plain six-letter pairs, with their broker
/// aliases.
const SYMBOL_ALIASES: &[(&str, &str)] = &[
    ("GOLD", "XAUUSD"),
    ("XAUUSD", "XAUUSD"),
    ("SILVER", "XAGUSD"),
    ("XAGUSD", "XAGUSD"),
    ("US30", "US30"),
    ("DOW", "US30"),
    ("NAS100", "NAS100"),
    ("NASDAQ", "NAS100"),
    ("SPX500", "SPX500"),
    ("GER40", "GER40"),
    ("DAX", "GER40"),
    ("BTCUSD", "BTCUSD"),
    ("BITCOIN", "BTCUSD"),
    ("ETHUSD", "ETHUSD"),
    ("USOIL", "USOIL"),
    ("OIL", "USOIL"),
];

/// Currencies accepted on either side of a six-letter pair. Filters out
/// random uppercase words that happen to be six letters.
const CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "AUD", "NZD", "CAD", "XAU", "XAG",
];

/// Extracts and normalizes the traded symbol from message text.
#[must_use]
pub fn extract_pair(text: &str) -> Option<String> {
    let upper = text.to_uppercase();

    for (alias, symbol) in SYMBOL_ALIASES {
        // Word-boundary containment; aliases are plain ASCII.
        if upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|w| w == *alias)
        {
            return Some((*symbol).to_string());
        }
    }

    for cap in PAIR_RE.captures_iter(&upper) {
        let base = &cap[1];
        let quote = &cap[2];
        if CURRENCIES.contains(&base) && CURRENCIES.contains(&quote) && base != quote {
            return Some(format!("{base}{quote}"));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_and_slashed_pairs() {
        assert_eq!(extract_pair("EURUSD buy now"), Some("EURUSD".to_string()));
        assert_eq!(extract_pair("gbp/jpy sell"), Some("GBPJPY".to_string()));
        assert_eq!(extract_pair("no pair here"), None);
    }

    #[test]
    fn normalizes_aliases() {
        assert_eq!(extract_pair("GOLD buy 1950"), Some("XAUUSD".to_string()));
        assert_eq!(extract_pair("short nasdaq"), Some("NAS100".to_string()));
    }

    #[test]
    fn rejects_non_currency_six_letter_words() {
        assert_eq!(extract_pair("SIGNAL BUY"), None);
    }

    #[test]
    fn command_pattern_matches_partial_close() {
        assert!(COMMAND_RE.is_match("close 50%"));
        assert!(COMMAND_RE.is_match("  Break Even"));
        assert!(COMMAND_RE.is_match("be"));
        assert!(!COMMAND_RE.is_match("EURUSD buy entry 1.0850"));
    }

    #[test]
    fn sl_pattern_ignores_sell_stop_orders() {
        let text = "SELL STOP 1.0800 SL 1.0850";
        let caps: Vec<&str> = SL_RE
            .captures_iter(text)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(caps, vec!["1.0850"]);
    }
}
