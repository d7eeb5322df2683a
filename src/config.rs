//! Configuration types.
//!
//! Every section has a `Default` and a `from_env()` that reads `TOOLGATE_*`
//! variables, falling back to the default for anything unset or unparsable.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::limiter::{BurstConfig, FailurePolicy, RateLimitConfig};
use crate::worker::RetryPolicy;

/// Read an environment variable and parse it, or fall back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

/// Job queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of concurrent workers.
    pub max_workers: usize,
    /// Hard timeout for a single tool invocation.
    pub job_timeout: Duration,
    /// Maximum number of pending jobs before enqueue is rejected.
    pub max_pending: usize,
    /// Upper bound accepted for a job's `max_retries`.
    pub max_retries_cap: u32,
    /// Backoff between attempts of a failing job.
    pub retry: RetryPolicy,
    /// Extra time past `job_timeout` before the watchdog fails an attempt.
    pub watchdog_grace: Duration,
    /// How often the watchdog and retention sweep run.
    pub sweep_interval: Duration,
    /// Terminal jobs older than this are purged. `None` keeps them forever.
    pub finished_retention: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            job_timeout: Duration::from_secs(30),
            max_pending: 10_000,
            max_retries_cap: 10,
            retry: RetryPolicy::default(),
            watchdog_grace: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            finished_retention: None,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retention_secs: u64 = env_or("TOOLGATE_FINISHED_RETENTION_SECS", 0);
        Self {
            max_workers: env_or("TOOLGATE_MAX_WORKERS", defaults.max_workers),
            job_timeout: env_secs("TOOLGATE_JOB_TIMEOUT_SECS", defaults.job_timeout),
            max_pending: env_or("TOOLGATE_MAX_PENDING", defaults.max_pending),
            max_retries_cap: env_or("TOOLGATE_MAX_RETRIES_CAP", defaults.max_retries_cap),
            retry: RetryPolicy {
                initial_backoff: env_millis(
                    "TOOLGATE_RETRY_INITIAL_MS",
                    defaults.retry.initial_backoff,
                ),
                max_backoff: env_millis("TOOLGATE_RETRY_MAX_MS", defaults.retry.max_backoff),
                multiplier: env_or("TOOLGATE_RETRY_MULTIPLIER", defaults.retry.multiplier),
                jitter: env_or("TOOLGATE_RETRY_JITTER", defaults.retry.jitter),
            },
            watchdog_grace: env_secs("TOOLGATE_WATCHDOG_GRACE_SECS", defaults.watchdog_grace),
            sweep_interval: env_secs("TOOLGATE_QUEUE_SWEEP_SECS", defaults.sweep_interval),
            finished_retention: (retention_secs > 0).then(|| Duration::from_secs(retention_secs)),
        }
    }
}

/// Rate limiter configuration: the default quota for each tier.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Default per-user quota (replaced by a per-request override when given).
    pub user: RateLimitConfig,
    /// Quota shared by every caller.
    pub global: Option<RateLimitConfig>,
    /// Per-client-address quota.
    pub ip: Option<RateLimitConfig>,
    /// Per-user burst smoothing.
    pub burst: Option<BurstConfig>,
    /// What to do when the backing store fails.
    pub failure_policy: FailurePolicy,
    /// How often idle windows and buckets are swept.
    pub sweep_interval: Duration,
    /// State untouched for this long is dropped by the sweep.
    pub idle_ttl: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            user: RateLimitConfig::new(100, Duration::from_secs(60)),
            global: Some(RateLimitConfig::new(10_000, Duration::from_secs(60))),
            ip: Some(RateLimitConfig::new(300, Duration::from_secs(60))),
            burst: Some(BurstConfig {
                capacity: 20.0,
                refill_per_sec: 5.0,
            }),
            failure_policy: FailurePolicy::FailOpen,
            sweep_interval: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(3600),
        }
    }
}

impl LimiterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let period = env_secs("TOOLGATE_RATE_PERIOD_SECS", defaults.user.period);

        let user = RateLimitConfig::new(
            env_or("TOOLGATE_USER_REQUESTS", defaults.user.requests_per_period),
            period,
        );
        let global_requests: u32 = env_or("TOOLGATE_GLOBAL_REQUESTS", 10_000);
        let ip_requests: u32 = env_or("TOOLGATE_IP_REQUESTS", 300);
        let burst_capacity: f64 = env_or("TOOLGATE_BURST_CAPACITY", 20.0);
        let burst_rate: f64 = env_or("TOOLGATE_BURST_RATE", 5.0);

        let failure_policy = match std::env::var("TOOLGATE_LIMITER_FAILURE_POLICY")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "closed" | "fail_closed" | "fail-closed" => FailurePolicy::FailClosed,
            _ => FailurePolicy::FailOpen,
        };

        Self {
            user,
            // Zero disables a tier.
            global: (global_requests > 0).then(|| RateLimitConfig::new(global_requests, period)),
            ip: (ip_requests > 0).then(|| RateLimitConfig::new(ip_requests, period)),
            burst: (burst_capacity > 0.0).then_some(BurstConfig {
                capacity: burst_capacity,
                refill_per_sec: burst_rate,
            }),
            failure_policy,
            sweep_interval: env_secs("TOOLGATE_LIMITER_SWEEP_SECS", defaults.sweep_interval),
            idle_ttl: env_secs("TOOLGATE_LIMITER_IDLE_SECS", defaults.idle_ttl),
        }
    }
}

/// Metrics collector configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Records older than this many days are pruned.
    pub retention_days: u32,
    /// Hard cap on retained records; the oldest are pruned first.
    pub max_records: usize,
    /// How often the retention sweep runs.
    pub sweep_interval: Duration,
    /// Tool error rate (percent) above which alerts escalate and reports
    /// recommend investigation.
    pub error_rate_threshold: f64,
    /// Average execution time above which a tool is reported as slow.
    pub slow_tool_threshold_ms: f64,
    /// Cache hit rate (percent) below which reports suggest caching.
    pub low_cache_hit_threshold: f64,
    /// Tools with fewer executions are left out of recommendations.
    pub min_executions_for_recommendation: u64,
    /// Number of recent failures returned by error analysis.
    pub recent_errors: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_records: 100_000,
            sweep_interval: Duration::from_secs(3600),
            error_rate_threshold: 10.0,
            slow_tool_threshold_ms: 5_000.0,
            low_cache_hit_threshold: 20.0,
            min_executions_for_recommendation: 5,
            recent_errors: 20,
        }
    }
}

impl MetricsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retention_days: env_or("TOOLGATE_METRICS_RETENTION_DAYS", defaults.retention_days),
            max_records: env_or("TOOLGATE_METRICS_MAX_RECORDS", defaults.max_records),
            sweep_interval: env_secs("TOOLGATE_METRICS_SWEEP_SECS", defaults.sweep_interval),
            error_rate_threshold: env_or(
                "TOOLGATE_ERROR_RATE_THRESHOLD",
                defaults.error_rate_threshold,
            ),
            slow_tool_threshold_ms: env_or(
                "TOOLGATE_SLOW_TOOL_MS",
                defaults.slow_tool_threshold_ms,
            ),
            low_cache_hit_threshold: env_or(
                "TOOLGATE_LOW_CACHE_HIT_THRESHOLD",
                defaults.low_cache_hit_threshold,
            ),
            ..defaults
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub queue: QueueConfig,
    pub limiter: LimiterConfig,
    pub metrics: MetricsConfig,
    /// Port for the read-only health router.
    pub http_port: u16,
    /// Where finished jobs are POSTed, if anywhere.
    pub webhook_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            limiter: LimiterConfig::default(),
            metrics: MetricsConfig::default(),
            http_port: 8080,
            webhook_url: None,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            queue: QueueConfig::from_env(),
            limiter: LimiterConfig::from_env(),
            metrics: MetricsConfig::from_env(),
            http_port: env_or("TOOLGATE_HTTP_PORT", 8080),
            webhook_url: std::env::var("TOOLGATE_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Reject configurations the components cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &str, message: &str) -> ConfigError {
            ConfigError::InvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.queue.max_workers == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if self.queue.job_timeout.is_zero() {
            return Err(invalid("job_timeout", "must be non-zero"));
        }
        if self.queue.max_pending == 0 {
            return Err(invalid("max_pending", "must be at least 1"));
        }
        if self.queue.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be >= 1.0"));
        }
        let tiers = [
            ("limiter.user", Some(&self.limiter.user)),
            ("limiter.global", self.limiter.global.as_ref()),
            ("limiter.ip", self.limiter.ip.as_ref()),
        ];
        for (key, tier) in tiers.into_iter().filter_map(|(k, t)| t.map(|t| (k, t))) {
            if tier.period.is_zero() {
                return Err(invalid(key, "period must be non-zero"));
            }
            if let Some(burst) = &tier.burst {
                burst.validate().map_err(|m| invalid(key, m))?;
            }
        }
        if let Some(burst) = &self.limiter.burst {
            burst.validate().map_err(|m| invalid("limiter.burst", m))?;
        }
        if self.metrics.retention_days == 0 {
            return Err(invalid("metrics.retention_days", "must be at least 1"));
        }
        Ok(())
    }
}
