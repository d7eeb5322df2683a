//! Sleep tool: waits for a given duration, stopping early on cancellation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolOutput, require_u64};

/// Longest sleep a caller may request.
const MAX_DURATION_MS: u64 = 60_000;

pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait for duration_ms milliseconds (at most 60000), then report the time slept."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "duration_ms": {
                    "type": "integer",
                    "description": "Milliseconds to wait",
                    "maximum": MAX_DURATION_MS
                }
            },
            "required": ["duration_ms"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let ms = require_u64(self.name(), &params, "duration_ms")?;
        if ms > MAX_DURATION_MS {
            return Err(ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: format!("duration_ms must be at most {MAX_DURATION_MS}"),
            });
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::ExecutionFailed {
                name: self.name().to_string(),
                reason: "cancelled".to_string(),
            }),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                Ok(ToolOutput::new(serde_json::json!({ "slept_ms": ms })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleeps_requested_duration() {
        let ctx = ExecutionContext::new("u", "sleep");
        let start = tokio::time::Instant::now();
        let out = SleepTool
            .execute(serde_json::json!({"duration_ms": 1500}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["slept_ms"], 1500);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn rejects_bad_params() {
        let ctx = ExecutionContext::new("u", "sleep");
        let err = SleepTool
            .execute(serde_json::json!({"duration_ms": 600_000}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "invalid_parameters");

        let err = SleepTool.execute(serde_json::json!({}), &ctx).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let ctx = ExecutionContext::new("u", "sleep");
        ctx.cancel.cancel();
        let err = SleepTool
            .execute(serde_json::json!({"duration_ms": 60_000}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "execution_error");
    }
}
