//! Sliding time window over recent trade timestamps.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Counts events inside a fixed look-back window. Old entries are pruned
/// lazily on each count.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    hits: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    #[must_use]
    pub fn minutes(minutes: i64) -> Self {
        Self {
            window: Duration::minutes(minutes),
            hits: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn hours(hours: i64) -> Self {
        Self {
            window: Duration::hours(hours),
            hits: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.hits.push_back(at);
    }

    /// Number of events within the window ending at `now`.
    pub fn count(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        while self.hits.front().is_some_and(|t| *t <= cutoff) {
            self.hits.pop_front();
        }
        self.hits.len()
    }
}
