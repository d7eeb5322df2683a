//! Shared invocation path for synchronous calls and queued jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::metrics::{MetricRecord, MetricsCollector};
use crate::tools::{ResultCache, ToolOutput, ToolRegistry};

/// Outcome of a successful invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: ToolOutput,
    pub cache_hit: bool,
    pub elapsed: Duration,
}

/// Looks tools up, serves cached results, and runs tools under a timeout
/// with panic capture. Every outcome is recorded with the metrics collector.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    metrics: Arc<MetricsCollector>,
    cache: ResultCache,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            registry,
            metrics,
            cache: ResultCache::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Run `ctx.tool_id` with `params`, bounded by the smaller of `timeout`
    /// and the tool's own execution timeout.
    pub async fn invoke(
        &self,
        params: Value,
        ctx: &ExecutionContext,
        timeout: Duration,
    ) -> Result<Invocation, ToolError> {
        let tool_id = ctx.tool_id.as_str();
        let Some(tool) = self.registry.get(tool_id).await else {
            let err = ToolError::NotFound {
                name: tool_id.to_string(),
            };
            self.record_failure(ctx, Duration::ZERO, &err).await;
            return Err(err);
        };

        let policy = tool.cache_policy();
        let cache_key = policy.enabled.then(|| ResultCache::key(tool_id, &params));
        if let Some(key) = &cache_key
            && let Some(output) = self.cache.get(key, Instant::now())
        {
            debug!(tool_id, user_id = %ctx.user_id, "Serving cached tool result");
            self.metrics
                .track(MetricRecord::success(tool_id, &ctx.user_id, 0).with_cache_hit(true))
                .await;
            return Ok(Invocation {
                output,
                cache_hit: true,
                elapsed: Duration::ZERO,
            });
        }

        let limit = tool
            .execution_timeout()
            .map_or(timeout, |own| own.min(timeout));
        let start = Instant::now();
        let run = AssertUnwindSafe(tool.execute(params, ctx)).catch_unwind();
        let outcome = match tokio::time::timeout(limit, run).await {
            Err(_) => {
                ctx.cancel.cancel();
                Err(ToolError::Timeout {
                    name: tool_id.to_string(),
                    timeout: limit,
                })
            }
            Ok(Err(panic)) => Err(ToolError::Panicked {
                name: tool_id.to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(result)) => result,
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(output) => {
                self.metrics
                    .track(
                        MetricRecord::success(tool_id, &ctx.user_id, elapsed.as_millis() as u64)
                            .with_usage(output.api_calls, output.estimated_cost),
                    )
                    .await;
                if let Some(key) = cache_key {
                    self.cache
                        .insert(key, output.clone(), policy.ttl, Instant::now());
                }
                Ok(Invocation {
                    output,
                    cache_hit: false,
                    elapsed,
                })
            }
            Err(err) => {
                warn!(
                    tool_id,
                    user_id = %ctx.user_id,
                    attempt = ctx.attempt,
                    error = %err,
                    "Tool execution failed"
                );
                self.record_failure(ctx, elapsed, &err).await;
                Err(err)
            }
        }
    }

    async fn record_failure(&self, ctx: &ExecutionContext, elapsed: Duration, err: &ToolError) {
        self.metrics
            .track(MetricRecord::failure(
                &ctx.tool_id,
                &ctx.user_id,
                elapsed.as_millis() as u64,
                err.error_type(),
            ))
            .await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
