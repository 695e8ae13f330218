use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tandem_core::{EngineError, EngineResult};
use tracing::warn;

/// Sliding-window rate limiter for feed queries, keyed per rider.
/// Process-scoped and injected, so tests get a fresh instance per case.
pub struct QueryThrottle {
    max_per_window: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl QueryThrottle {
    pub fn new(max_per_window: usize, window: std::time::Duration) -> Self {
        Self {
            max_per_window,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60)),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a query attempt; fails with `THROTTLED` once the rider
    /// exceeds the window budget.
    pub fn check(&self, rider_id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let mut hits = self
            .hits
            .lock()
            .map_err(|_| EngineError::Validation("throttle lock poisoned".into()))?;
        let window_start = now - self.window;
        // Sweep every rider, not just the caller, so idle riders do not
        // pin map entries forever.
        hits.retain(|_, entry| {
            while entry.front().is_some_and(|t| *t < window_start) {
                entry.pop_front();
            }
            !entry.is_empty()
        });
        let entry = hits.entry(rider_id.to_string()).or_default();
        if entry.len() >= self.max_per_window {
            warn!(rider_id, "feed query throttled");
            return Err(EngineError::Throttled);
        }
        entry.push_back(now);
        Ok(())
    }
}
