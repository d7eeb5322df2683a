//! Gateway: admission in front of synchronous calls and queued jobs.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::GatewayConfig;
use crate::context::ExecutionContext;
use crate::error::{ConfigError, Error, Result, ToolError};
use crate::executor::{Invocation, ToolExecutor};
use crate::limiter::{Admission, AdmissionRequest, LimiterStats, RateLimitConfig, RateLimiter};
use crate::metrics::{MetricsCollector, SystemStats};
use crate::tools::ToolRegistry;
use crate::tools::builtin::register_builtins;
use crate::worker::{
    JobHooks, JobQueue, JobStatus, JobView, Priority, QueueStats, WebhookNotifier,
};

/// Action name for synchronous calls.
const ACTION_EXECUTE: &str = "execute";
/// Action name for queued jobs.
const ACTION_ENQUEUE: &str = "enqueue";

/// Identity resolved by the outer router for one request.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    pub ip: Option<String>,
    /// Per-user quota replacing the default user tier (e.g. a paid plan).
    pub quota_override: Option<RateLimitConfig>,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ip: None,
            quota_override: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_quota(mut self, quota: RateLimitConfig) -> Self {
        self.quota_override = Some(quota);
        self
    }
}

/// Combined health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub tools: usize,
    pub queue: QueueStats,
    pub limiter: LimiterStats,
    pub system: SystemStats,
}

/// Facade wiring the limiter, executor, and queue together.
pub struct Gateway {
    limiter: Arc<RateLimiter>,
    executor: Arc<ToolExecutor>,
    queue: Arc<JobQueue>,
}

impl Gateway {
    /// Build every component from `config` and register the built-in tools.
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ToolRegistry::new());
        register_builtins(&registry).await;
        let metrics = Arc::new(MetricsCollector::new(config.metrics));
        let executor = Arc::new(ToolExecutor::new(registry, metrics));

        let mut hooks = JobHooks::default();
        if let Some(url) = &config.webhook_url {
            let notifier =
                WebhookNotifier::new(url.clone()).map_err(|e| ConfigError::InvalidValue {
                    key: "webhook_url".to_string(),
                    message: e.to_string(),
                })?;
            hooks.notifier = Arc::new(notifier);
            info!(url = %url, "Job webhook enabled");
        }

        let queue = Arc::new(JobQueue::with_hooks(
            config.queue,
            Arc::clone(&executor),
            hooks,
        ));
        let limiter = Arc::new(RateLimiter::new(config.limiter));
        Ok(Self::from_parts(limiter, executor, queue))
    }

    pub fn from_parts(
        limiter: Arc<RateLimiter>,
        executor: Arc<ToolExecutor>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            limiter,
            executor,
            queue,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.executor.registry()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.executor.metrics()
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    async fn admit(&self, caller: &CallerIdentity, action: &str, tool_id: &str) -> Result<()> {
        let mut request = AdmissionRequest::new(&caller.user_id, action);
        if let Some(ip) = &caller.ip {
            request = request.with_ip(ip);
        }
        if let Some(quota) = &caller.quota_override {
            request = request.with_override(quota.clone());
        }
        if let Some(tool) = self.registry().get(tool_id).await
            && let Some(quota) = tool.rate_limit()
        {
            request = request.with_tool(tool_id, quota);
        }

        match self.limiter.check(&request).await {
            Admission::Admitted => Ok(()),
            Admission::Denied { tier, retry_after } => Err(Error::RateLimited {
                tier: tier.to_string(),
                retry_after,
            }),
        }
    }

    /// Admit, then run the tool synchronously under the queue's job timeout.
    pub async fn call(
        &self,
        caller: &CallerIdentity,
        tool_id: &str,
        params: Value,
    ) -> Result<Invocation> {
        if !self.registry().has(tool_id).await {
            return Err(ToolError::NotFound {
                name: tool_id.to_string(),
            }
            .into());
        }
        self.admit(caller, ACTION_EXECUTE, tool_id).await?;
        let ctx = ExecutionContext::new(&caller.user_id, tool_id);
        let timeout = self.queue.config().job_timeout;
        Ok(self.executor.invoke(params, &ctx, timeout).await?)
    }

    /// Admit, then queue the call. Returns the job id.
    pub async fn submit(
        &self,
        caller: &CallerIdentity,
        tool_id: &str,
        params: Value,
        priority: Priority,
        max_retries: u32,
    ) -> Result<String> {
        self.admit(caller, ACTION_ENQUEUE, tool_id).await?;
        Ok(self
            .queue
            .enqueue(tool_id, params, &caller.user_id, priority, max_retries)
            .await?)
    }

    pub async fn job_view(&self, caller: &CallerIdentity, job_id: &str) -> Option<JobView> {
        self.queue.get_view(job_id, &caller.user_id).await
    }

    /// Jobs submitted by `user_id`, redacted unless the caller owns them.
    pub async fn jobs_of(&self, caller: &CallerIdentity, user_id: &str) -> Vec<JobView> {
        self.queue.get_views_by_user(user_id, &caller.user_id).await
    }

    /// Jobs in `status` across all users, redacted per job owner.
    pub async fn jobs_with_status(&self, caller: &CallerIdentity, status: JobStatus) -> Vec<JobView> {
        self.queue.get_views_by_status(status, &caller.user_id).await
    }

    pub async fn cancel(&self, caller: &CallerIdentity, job_id: &str) -> bool {
        self.queue.cancel_job(job_id, &caller.user_id).await
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            tools: self.registry().count().await,
            queue: self.queue.get_stats().await,
            limiter: self.limiter.get_stats().await,
            system: self.metrics().get_system_stats(),
        }
    }

    /// Start the worker pool and every background sweep.
    pub async fn start(&self) {
        self.queue.start().await;
        self.limiter.start().await;
        self.metrics().start().await;
    }

    /// Stop everything started by [`Gateway::start`].
    pub async fn stop(&self) {
        self.queue.stop().await;
        self.limiter.stop().await;
        self.metrics().stop().await;
    }
}
