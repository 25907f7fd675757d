use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Window after which a discrete event is forgotten, independent of any
/// signal's own `within_seconds`.
pub const DEFAULT_WINDOW_SECONDS: u64 = 10;

/// Most recent occurrence of each discrete event name.
///
/// Owned and pruned by whoever drives frames through the engines; the
/// derivation engine only ever reads it.
#[derive(Debug, Clone, Default)]
pub struct RecencyIndex {
    seen: HashMap<String, DateTime<Utc>>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an occurrence. An older timestamp never overwrites a newer one.
    pub fn record(&mut self, event: &str, at: DateTime<Utc>) {
        self.seen
            .entry(event.to_string())
            .and_modify(|t| {
                if at > *t {
                    *t = at;
                }
            })
            .or_insert(at);
    }

    /// Drop every event older than `window` relative to `now`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        self.seen.retain(|_, at| now.signed_duration_since(*at) <= window);
    }

    pub fn last_seen(&self, event: &str) -> Option<DateTime<Utc>> {
        self.seen.get(event).copied()
    }

    /// Age of the last occurrence relative to `now`.
    pub fn age(&self, event: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.last_seen(event)
            .map(|at| now.signed_duration_since(at))
    }

    /// True iff `event` happened no more than `within_seconds` before `now`.
    /// No hysteresis: the check flips the instant the age exceeds the bound.
    pub fn within(&self, event: &str, within_seconds: f64, now: DateTime<Utc>) -> bool {
        match self.age(event, now) {
            Some(age) => {
                let secs = age.num_microseconds().map(|us| us as f64 / 1e6);
                matches!(secs, Some(s) if s >= 0.0 && s <= within_seconds)
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
