//! Backing storage for limiter state.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::config::{BurstConfig, Decision, RateLimitConfig};
use super::window::{BurstBucket, RateLimitWindow};
use crate::error::LimiterError;

/// Number of live entries in a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub windows: usize,
    pub buckets: usize,
}

/// Storage for windows and buckets.
///
/// Implementations must apply each hit as one atomic read-modify-write per
/// key, so two concurrent checks can never both take the last slot.
#[async_trait]
pub trait LimiterStore: Send + Sync {
    /// Backend name reported in stats.
    fn backend(&self) -> &str;

    /// Count a request against the fixed window stored under `key`.
    async fn hit_window(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: Instant,
    ) -> Result<Decision, LimiterError>;

    /// Spend a token from the bucket stored under `key`.
    async fn take_token(
        &self,
        key: &str,
        config: &BurstConfig,
        now: Instant,
    ) -> Result<Decision, LimiterError>;

    /// Drop idle state. Returns the number of entries removed.
    async fn sweep(&self, now: Instant, idle_ttl: Duration) -> Result<usize, LimiterError>;

    async fn counts(&self) -> Result<StoreCounts, LimiterError>;
}

/// Process-local store on sharded maps.
///
/// Each key's entry is locked only for the duration of its own update, so
/// unrelated identifiers never contend on a single lock.
#[derive(Default)]
pub struct InMemoryStore {
    windows: DashMap<String, RateLimitWindow>,
    buckets: DashMap<String, BurstBucket>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LimiterStore for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn hit_window(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: Instant,
    ) -> Result<Decision, LimiterError> {
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitWindow::new(key, config, now));
        Ok(window.hit(config, now))
    }

    async fn take_token(
        &self,
        key: &str,
        config: &BurstConfig,
        now: Instant,
    ) -> Result<Decision, LimiterError> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| BurstBucket::new(key, config, now));
        Ok(bucket.take(config, now))
    }

    async fn sweep(&self, now: Instant, idle_ttl: Duration) -> Result<usize, LimiterError> {
        let before = self.windows.len() + self.buckets.len();
        self.windows.retain(|_, w| !w.is_idle(now, idle_ttl));
        self.buckets.retain(|_, b| !b.is_idle(now, idle_ttl));
        Ok(before.saturating_sub(self.windows.len() + self.buckets.len()))
    }

    async fn counts(&self) -> Result<StoreCounts, LimiterError> {
        Ok(StoreCounts {
            windows: self.windows.len(),
            buckets: self.buckets.len(),
        })
    }
}
