//! Multi-tier admission control.
//!
//! - `config`: quotas, tiers, admission request/response types
//! - `window`: fixed-window counter and token bucket state
//! - `store`: storage trait and the in-memory sharded store
//!
//! A request is admitted only when every configured tier admits it. Tiers are
//! checked in order (user, tool, ip, burst, global) and the first denial
//! short-circuits; slots already spent in earlier tiers are not refunded.

pub mod config;
pub mod store;
pub mod window;

pub use config::{
    Admission, AdmissionRequest, BurstConfig, Decision, FailurePolicy, RateLimitConfig, Tier,
};
pub use store::{InMemoryStore, LimiterStore, StoreCounts};
pub use window::{BurstBucket, RateLimitWindow};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LimiterConfig;
use crate::error::LimiterError;

/// Observability snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub backend: String,
    pub active_windows: usize,
    pub burst_buckets: usize,
    pub checks_total: u64,
    pub denied_total: u64,
    pub backend_errors: u64,
}

/// Admission gate over a [`LimiterStore`].
pub struct RateLimiter {
    store: Arc<dyn LimiterStore>,
    config: LimiterConfig,
    checks_total: AtomicU64,
    denied_total: AtomicU64,
    backend_errors: AtomicU64,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter backed by the in-memory store.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(config: LimiterConfig, store: Arc<dyn LimiterStore>) -> Self {
        Self {
            store,
            config,
            checks_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Check a single identifier/action pair against `config`.
    ///
    /// Counts against the fixed window and, when `config.burst` is set, the
    /// token bucket for the same key. Both must admit.
    pub async fn check_limit(
        &self,
        identifier: &str,
        action: &str,
        config: &RateLimitConfig,
    ) -> bool {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        let key = state_key(identifier, action);
        let now = Instant::now();

        let mut decision = self.window(&key, config, now).await;
        if decision.allowed
            && let Some(burst) = &config.burst
        {
            decision = self.bucket(&key, burst, now).await;
        }

        if !decision.allowed {
            self.denied_total.fetch_add(1, Ordering::Relaxed);
            debug!(identifier, action, "Rate limit denied");
        }
        decision.allowed
    }

    /// Check every configured tier for one request.
    pub async fn check(&self, request: &AdmissionRequest) -> Admission {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let action = request.action.as_str();

        let user_quota = request
            .quota_override
            .as_ref()
            .unwrap_or(&self.config.user);
        let user_key = format!("user:{}", request.user_id);

        let mut tiers: Vec<(Tier, String, &RateLimitConfig)> =
            vec![(Tier::User, state_key(&user_key, action), user_quota)];
        if let Some((tool_id, quota)) = &request.tool {
            tiers.push((
                Tier::Tool,
                state_key(&format!("tool:{tool_id}:{user_key}"), action),
                quota,
            ));
        }
        if let (Some(ip), Some(quota)) = (&request.ip, &self.config.ip) {
            tiers.push((Tier::Ip, state_key(&format!("ip:{ip}"), action), quota));
        }

        for (tier, key, quota) in &tiers {
            let decision = self.window(key, quota, now).await;
            if !decision.allowed {
                return self.denied(*tier, decision, request);
            }
        }

        let burst = user_quota.burst.as_ref().or(self.config.burst.as_ref());
        if let Some(burst) = burst {
            let decision = self.bucket(&format!("burst:{user_key}"), burst, now).await;
            if !decision.allowed {
                return self.denied(Tier::Burst, decision, request);
            }
        }

        if let Some(quota) = &self.config.global {
            let decision = self.window(&state_key("global", action), quota, now).await;
            if !decision.allowed {
                return self.denied(Tier::Global, decision, request);
            }
        }

        Admission::Admitted
    }

    fn denied(&self, tier: Tier, decision: Decision, request: &AdmissionRequest) -> Admission {
        self.denied_total.fetch_add(1, Ordering::Relaxed);
        debug!(
            user_id = %request.user_id,
            action = %request.action,
            tier = %tier,
            "Admission denied"
        );
        Admission::Denied {
            tier,
            retry_after: decision.retry_after,
        }
    }

    async fn window(&self, key: &str, config: &RateLimitConfig, now: Instant) -> Decision {
        match self.store.hit_window(key, config, now).await {
            Ok(decision) => decision,
            Err(e) => self.backend_failed(key, e),
        }
    }

    async fn bucket(&self, key: &str, config: &BurstConfig, now: Instant) -> Decision {
        match self.store.take_token(key, config, now).await {
            Ok(decision) => decision,
            Err(e) => self.backend_failed(key, e),
        }
    }

    fn backend_failed(&self, key: &str, error: LimiterError) -> Decision {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
        match self.config.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(key, error = %error, "Limiter backend failed, admitting (fail-open)");
                Decision::allow()
            }
            FailurePolicy::FailClosed => {
                warn!(key, error = %error, "Limiter backend failed, denying (fail-closed)");
                Decision::deny(None)
            }
        }
    }

    pub async fn get_stats(&self) -> LimiterStats {
        let counts = match self.store.counts().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "Could not read limiter store counts");
                StoreCounts::default()
            }
        };
        LimiterStats {
            backend: self.store.backend().to_string(),
            active_windows: counts.windows,
            burst_buckets: counts.buckets,
            checks_total: self.checks_total.load(Ordering::Relaxed),
            denied_total: self.denied_total.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }

    /// Drop idle windows and buckets now.
    pub async fn sweep(&self) -> usize {
        match self.store.sweep(Instant::now(), self.config.idle_ttl).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Limiter sweep failed");
                0
            }
        }
    }

    /// Spawn the periodic idle-state sweep. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }
        let limiter = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // Skip immediate first tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep().await;
                        if removed > 0 {
                            debug!(removed, "Swept idle limiter state");
                        }
                    }
                }
            }
        }));
    }

    /// Stop the sweep task.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.lock().await.take() {
            let _ = handle.await;
        }
    }
}

fn state_key(identifier: &str, action: &str) -> String {
    format!("{identifier}#{action}")
}
