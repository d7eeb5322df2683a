//! Quota descriptions and admission request/response types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed-window quota, optionally smoothed by a token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub requests_per_period: u32,
    /// Window length.
    #[serde(with = "duration_secs")]
    pub period: Duration,
    /// Token-bucket smoothing layered on the window.
    #[serde(default)]
    pub burst: Option<BurstConfig>,
}

impl RateLimitConfig {
    pub fn new(requests_per_period: u32, period: Duration) -> Self {
        Self {
            requests_per_period,
            period,
            burst: None,
        }
    }

    pub fn with_burst(mut self, capacity: f64, refill_per_sec: f64) -> Self {
        self.burst = Some(BurstConfig {
            capacity,
            refill_per_sec,
        });
        self
    }
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Maximum tokens held.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl BurstConfig {
    /// Capacity must be finite and at least one token; the refill rate finite
    /// and non-negative.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.capacity.is_finite() || self.capacity < 1.0 {
            return Err("capacity must be finite and >= 1");
        }
        if !self.refill_per_sec.is_finite() || self.refill_per_sec < 0.0 {
            return Err("refill rate must be finite and non-negative");
        }
        Ok(())
    }
}

/// Behavior when the backing store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request and log the backend failure.
    #[default]
    FailOpen,
    /// Deny the request and log the backend failure.
    FailClosed,
}

/// Admission tiers, checked independently against their own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    User,
    Tool,
    Ip,
    Burst,
    Global,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Tool => "tool",
            Self::Ip => "ip",
            Self::Burst => "burst",
            Self::Global => "global",
        };
        write!(f, "{s}")
    }
}

/// Everything the limiter needs to decide on one request.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub user_id: String,
    /// Client address, when known.
    pub ip: Option<String>,
    /// Action being admitted (e.g. `execute`, `enqueue`).
    pub action: String,
    /// Replaces the default user-tier quota (e.g. a paid plan).
    pub quota_override: Option<RateLimitConfig>,
    /// Tool-specific quota layered on the other tiers.
    pub tool: Option<(String, RateLimitConfig)>,
}

impl AdmissionRequest {
    pub fn new(user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ip: None,
            action: action.into(),
            quota_override: None,
            tool: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_override(mut self, quota: RateLimitConfig) -> Self {
        self.quota_override = Some(quota);
        self
    }

    pub fn with_tool(mut self, tool_id: impl Into<String>, quota: RateLimitConfig) -> Self {
        self.tool = Some((tool_id.into(), quota));
        self
    }
}

/// Outcome of a multi-tier check.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted,
    Denied {
        tier: Tier,
        retry_after: Option<Duration>,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Result of a single window or bucket check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Hint for when a denied request could succeed.
    pub retry_after: Option<Duration>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    pub fn deny(retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
