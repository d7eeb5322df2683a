//! Error alert hook.

use tracing::{error, warn};

use super::record::{MetricRecord, ToolStats};

/// Receives every failed execution along with the tool's updated totals.
///
/// Called inline from `track`, so implementations should hand slow work off
/// to a task rather than block.
pub trait AlertSink: Send + Sync {
    fn on_failure(&self, record: &MetricRecord, stats: &ToolStats);
}

/// Logs failures, escalating once a tool's error rate crosses the threshold.
pub struct LogAlertSink {
    error_rate_threshold: f64,
    min_executions: u64,
}

impl LogAlertSink {
    pub fn new(error_rate_threshold: f64, min_executions: u64) -> Self {
        Self {
            error_rate_threshold,
            min_executions,
        }
    }
}

impl AlertSink for LogAlertSink {
    fn on_failure(&self, record: &MetricRecord, stats: &ToolStats) {
        if stats.total_executions >= self.min_executions
            && stats.error_rate >= self.error_rate_threshold
        {
            error!(
                tool_id = %record.tool_id,
                error_rate = stats.error_rate,
                failed = stats.failed,
                total = stats.total_executions,
                "Tool error rate above threshold"
            );
        } else {
            warn!(
                tool_id = %record.tool_id,
                user_id = %record.user_id,
                error_type = record.error_type.as_deref().unwrap_or("unknown"),
                "Tool execution failed"
            );
        }
    }
}
