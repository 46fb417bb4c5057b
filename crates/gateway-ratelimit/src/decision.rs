use std::time::Duration;

/// Outcome of a single rate-limit check (§4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: f64,
    pub reset_after: Duration,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allow(remaining: f64, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            remaining: remaining.max(0.0),
            reset_after,
            retry_after: None,
        }
    }

    pub fn deny(reset_after: Duration, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0.0,
            reset_after,
            // §8 boundary: retry_after is strictly positive when denied.
            retry_after: Some(retry_after.max(Duration::from_millis(1))),
        }
    }
}
