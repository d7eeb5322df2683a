//! Echo tool: returns its parameters unchanged.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::tools::tool::{CachePolicy, Tool, ToolOutput};

/// How long echoed results stay cached.
const CACHE_TTL: Duration = Duration::from_secs(300);

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given parameters unchanged. Useful for connectivity checks."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": true
        })
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::for_ttl(CACHE_TTL)
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::new(params))
    }
}
