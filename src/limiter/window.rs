//! Fixed-window counter and token bucket state.
//!
//! The window is coarse: it resets at `window_start + period`, so a caller can
//! spend a full quota just before the boundary and another just after it.

use std::time::Duration;

use tokio::time::Instant;

use super::config::{BurstConfig, Decision, RateLimitConfig};

/// Per-identifier fixed-window counter.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub identifier: String,
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
    pub period: Duration,
}

impl RateLimitWindow {
    pub fn new(identifier: impl Into<String>, config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            identifier: identifier.into(),
            window_start: now,
            count: 0,
            limit: config.requests_per_period,
            period: config.period,
        }
    }

    /// Count one request against the window.
    ///
    /// The limit and period follow `config`, so an override applies from the
    /// next check on without resetting the current count.
    pub fn hit(&mut self, config: &RateLimitConfig, now: Instant) -> Decision {
        self.limit = config.requests_per_period;
        self.period = config.period;

        if now.saturating_duration_since(self.window_start) >= self.period {
            self.count = 0;
            self.window_start = now;
        }

        if self.count < self.limit {
            self.count += 1;
            Decision::allow()
        } else {
            let elapsed = now.saturating_duration_since(self.window_start);
            Decision::deny(Some(self.period.saturating_sub(elapsed)))
        }
    }

    /// Whether the window has expired and been untouched for `idle_ttl`.
    pub fn is_idle(&self, now: Instant, idle_ttl: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= self.period.max(idle_ttl)
    }
}

/// Per-identifier token bucket.
#[derive(Debug, Clone)]
pub struct BurstBucket {
    pub identifier: String,
    pub tokens: f64,
    pub last_refill: Instant,
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl BurstBucket {
    /// New buckets start full.
    pub fn new(identifier: impl Into<String>, config: &BurstConfig, now: Instant) -> Self {
        Self {
            identifier: identifier.into(),
            tokens: config.capacity,
            last_refill: now,
            capacity: config.capacity,
            refill_per_sec: config.refill_per_sec,
        }
    }

    // A negative or NaN capacity holds nothing rather than panicking the clamp.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let capacity = self.capacity.max(0.0);
        let refilled = self.tokens + elapsed * self.refill_per_sec.max(0.0);
        self.tokens = if refilled.is_nan() {
            0.0
        } else {
            refilled.clamp(0.0, capacity)
        };
        self.last_refill = now;
    }

    /// Spend one token if available.
    pub fn take(&mut self, config: &BurstConfig, now: Instant) -> Decision {
        self.capacity = config.capacity;
        self.refill_per_sec = config.refill_per_sec;
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::allow()
        } else if self.refill_per_sec > 0.0 {
            // Unrepresentable waits (tiny rates) carry no hint.
            let wait = (1.0 - self.tokens) / self.refill_per_sec;
            Decision::deny(Duration::try_from_secs_f64(wait).ok())
        } else {
            Decision::deny(None)
        }
    }

    /// Idle and would have refilled to capacity anyway.
    pub fn is_idle(&self, now: Instant, idle_ttl: Duration) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        elapsed >= idle_ttl
            && self.tokens + elapsed.as_secs_f64() * self.refill_per_sec >= self.capacity
    }
}
