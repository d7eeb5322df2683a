//! Per-invocation context handed to tools.

use tokio_util::sync::CancellationToken;

/// Who is running what, and a token that fires when the run should stop.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Set when the invocation belongs to a queued job.
    pub job_id: Option<String>,
    pub user_id: String,
    pub tool_id: String,
    /// Zero-based attempt number; non-zero only for job retries.
    pub attempt: u32,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    /// Context for a synchronous call.
    pub fn new(user_id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self {
            job_id: None,
            user_id: user_id.into(),
            tool_id: tool_id.into(),
            attempt: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Context for one attempt of a queued job.
    pub fn for_job(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        tool_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            job_id: Some(job_id.into()),
            attempt,
            ..Self::new(user_id, tool_id)
        }
    }
}
