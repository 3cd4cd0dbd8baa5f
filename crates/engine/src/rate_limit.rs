//! Shared rate limiting for external providers and agents.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Per-provider request tracker: (request count, window start time).
type ProviderTracker = HashMap<String, (u64, Instant)>;

/// Fixed-window request counter keyed by provider name, shared by every
/// in-flight workflow.
pub struct RateLimiter {
    tracker: Mutex<ProviderTracker>,
    /// Maximum requests per window per provider.
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            tracker: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Record a call to `provider`.
    /// Returns Ok(()) if allowed, Err(retry_after) if rate limited.
    pub async fn check(&self, provider: &str) -> Result<(), Duration> {
        let mut tracker = self.tracker.lock().await;
        let now = Instant::now();

        let entry = tracker.entry(provider.to_string()).or_insert((0, now));

        // Reset window if expired
        let elapsed = now.duration_since(entry.1);
        if elapsed >= self.window {
            entry.0 = 0;
            entry.1 = now;
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            Err(self.window.saturating_sub(elapsed))
        } else {
            Ok(())
        }
    }
}
