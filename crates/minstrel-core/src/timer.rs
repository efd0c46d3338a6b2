//! Named-stopwatch utility for iteration and stream timing.
//!
//! Purely observability: timer state never affects training correctness,
//! only logged statistics.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Key for one timed event: a name plus an optional numeric index, so both
/// `"train"` and `("stream", 5)` style keys work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    name: String,
    index: Option<u64>,
}

impl TimerKey {
    #[must_use]
    pub fn new(name: impl Into<String>, index: Option<u64>) -> Self {
        Self { name: name.into(), index }
    }
}

impl From<&str> for TimerKey {
    fn from(name: &str) -> Self {
        Self::new(name, None)
    }
}

impl From<(&str, u64)> for TimerKey {
    fn from((name, index): (&str, u64)) -> Self {
        Self::new(name, Some(index))
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.name, i),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone)]
struct TimerEntry {
    started: Instant,
    ended: Option<Instant>,
    end_at: Option<DateTime<Utc>>,
}

/// Tracks start/end/elapsed for arbitrarily keyed events.
#[derive(Debug, Default)]
pub struct TimerHolder {
    entries: HashMap<TimerKey, TimerEntry>,
}

impl TimerHolder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current time against `key`, overwriting any prior
    /// unfinished start for that key.
    pub fn start(&mut self, key: impl Into<TimerKey>) {
        self.entries.insert(
            key.into(),
            TimerEntry { started: Instant::now(), ended: None, end_at: None },
        );
    }

    /// Record the end time for `key`.
    ///
    /// # Errors
    /// Fails if `key` was never started.
    pub fn end(&mut self, key: impl Into<TimerKey>) -> Result<Duration> {
        let key = key.into();
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| CoreError::TimerNotStarted(key.to_string()))?;
        let now = Instant::now();
        entry.ended = Some(now);
        entry.end_at = Some(Utc::now());
        Ok(now.duration_since(entry.started))
    }

    /// Elapsed duration for a completed key; `None` if never started or not
    /// yet ended.
    #[must_use]
    pub fn elapsed(&self, key: impl Into<TimerKey>) -> Option<Duration> {
        let entry = self.entries.get(&key.into())?;
        entry.ended.map(|e| e.duration_since(entry.started))
    }

    /// Wall-clock end timestamp for a completed key.
    #[must_use]
    pub fn end_time(&self, key: impl Into<TimerKey>) -> Option<DateTime<Utc>> {
        self.entries.get(&key.into()).and_then(|e| e.end_at)
    }

    /// Average elapsed time over the indexed keys `(name, lo)..(name, hi)`,
    /// skipping keys with no recorded elapsed time. `None` if no key in the
    /// range has completed.
    #[must_use]
    pub fn mean_over(&self, name: &str, lo: u64, hi: u64) -> Option<Duration> {
        let completed: Vec<Duration> = (lo..hi)
            .filter_map(|i| self.elapsed((name, i)))
            .collect();
        if completed.is_empty() {
            return None;
        }
        let total: Duration = completed.iter().sum();
        Some(total / completed.len() as u32)
    }
}
