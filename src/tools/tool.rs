//! Tool trait and the values that flow through it.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::limiter::RateLimitConfig;

/// Whether and for how long a tool's successful results may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
}

impl CachePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: Duration::ZERO,
        }
    }

    pub fn for_ttl(ttl: Duration) -> Self {
        Self { enabled: true, ttl }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub result: Value,
    /// Upstream API calls made while producing the result.
    pub api_calls: u32,
    pub estimated_cost: Decimal,
}

impl ToolOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            api_calls: 0,
            estimated_cost: Decimal::ZERO,
        }
    }

    pub fn with_usage(mut self, api_calls: u32, estimated_cost: Decimal) -> Self {
        self.api_calls = api_calls;
        self.estimated_cost = estimated_cost;
        self
    }
}

/// Catalog entry for a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub timeout_ms: Option<u64>,
    pub cached: bool,
    pub builtin: bool,
}

/// An invocable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Upper bound on one execution. The effective limit is the smaller of
    /// this and the caller's timeout.
    fn execution_timeout(&self) -> Option<Duration> {
        None
    }

    /// Quota for the per-tool admission tier, if the tool has one.
    fn rate_limit(&self) -> Option<RateLimitConfig> {
        None
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::disabled()
    }

    /// Run the tool. Long-running tools should watch `ctx.cancel` and return
    /// early once it fires.
    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError>;
}

/// Read a required unsigned integer parameter.
pub fn require_u64(tool: &str, params: &Value, key: &str) -> Result<u64, ToolError> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing or non-integer '{key}'"),
        })
}
