//! Per-tool sliding-window rate limiting.
//!
//! Keyed by the namespaced tool name; each window holds the call
//! timestamps of the last 60 seconds. In-process only -- a
//! multi-instance deployment would need a shared limiter.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

pub struct SlidingWindowLimiter {
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a call against `key`, enforcing `limit` calls per minute.
    /// Returns `Err(remaining_secs)` when over the limit.
    pub fn check_and_record(&self, key: &str, limit: u32) -> Result<(), u64> {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        let q = hits.entry(key.to_string()).or_default();

        while let Some(front) = q.front() {
            if now.duration_since(*front) > WINDOW {
                q.pop_front();
            } else {
                break;
            }
        }

        if q.len() >= limit as usize {
            let retry_after = q
                .front()
                .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)).as_secs())
                .unwrap_or(WINDOW.as_secs());
            return Err(retry_after.max(1));
        }

        q.push_back(now);
        Ok(())
    }

    /// Current window occupancy for `key`.
    pub fn current(&self, key: &str) -> usize {
        self.hits.lock().get(key).map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}
