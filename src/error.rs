//! Error types for toolgate.

use std::time::Duration;

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Rate limit exceeded on {tier} tier, retry after {retry_after:?}")]
    RateLimited {
        tier: String,
        retry_after: Option<Duration>,
    },
}

impl Error {
    /// Whether the caller may retry the same request later.
    ///
    /// Rate limiting and a full queue are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Queue(QueueError::QueueFull { .. })
        )
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid job: {reason}")]
    Validation { reason: String },

    #[error("Queue is full ({capacity} pending jobs)")]
    QueueFull { capacity: usize },

    #[error("Queue is not running")]
    NotRunning,
}

/// Tool execution errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} panicked: {message}")]
    Panicked { name: String, message: String },
}

impl ToolError {
    /// Stable classification used as `error_type` on jobs and metric records.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "tool_not_found",
            Self::ExecutionFailed { .. } => "execution_error",
            Self::Timeout { .. } => "timeout",
            Self::InvalidParameters { .. } => "invalid_parameters",
            Self::Panicked { .. } => "panic",
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. } | Self::InvalidParameters { .. }
        )
    }
}

/// Rate limiter backend errors. The limiter resolves these through its
/// failure policy; they never reach callers.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("Limiter backend {backend} unavailable: {reason}")]
    Backend { backend: String, reason: String },
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types_are_stable() {
        let timeout = ToolError::Timeout {
            name: "echo".into(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(timeout.error_type(), "timeout");
        assert_eq!(
            ToolError::NotFound { name: "x".into() }.error_type(),
            "tool_not_found"
        );
        assert_eq!(
            ToolError::Panicked {
                name: "x".into(),
                message: "boom".into()
            }
            .error_type(),
            "panic"
        );
    }

    #[test]
    fn retryable_classification() {
        let limited = Error::RateLimited {
            tier: "user".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(limited.is_retryable());
        assert!(Error::Queue(QueueError::QueueFull { capacity: 1 }).is_retryable());
        assert!(
            !Error::Tool(ToolError::NotFound {
                name: "missing".into()
            })
            .is_retryable()
        );
        assert!(
            !Error::Queue(QueueError::Validation {
                reason: "bad".into()
            })
            .is_retryable()
        );
    }

    #[test]
    fn invalid_parameters_not_retried() {
        let err = ToolError::InvalidParameters {
            name: "echo".into(),
            reason: "missing".into(),
        };
        assert!(!err.is_retryable());
        assert!(
            ToolError::ExecutionFailed {
                name: "echo".into(),
                reason: "io".into()
            }
            .is_retryable()
        );
    }
}
