//! Callbacks fired when a job reaches a terminal status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::job::Job;

/// Durable storage for finished jobs.
#[async_trait]
pub trait JobPersistence: Send + Sync {
    async fn save(&self, job: &Job) -> anyhow::Result<()>;
}

/// Outbound notification of a finished job.
#[async_trait]
pub trait JobNotifier: Send + Sync {
    async fn notify(&self, job: &Job) -> anyhow::Result<()>;
}

/// Persistence that stores nothing.
pub struct NoopPersistence;

#[async_trait]
impl JobPersistence for NoopPersistence {
    async fn save(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Notifier that sends nothing.
pub struct NoopNotifier;

#[async_trait]
impl JobNotifier for NoopNotifier {
    async fn notify(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }
}

/// POSTs the finished job as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl JobNotifier for WebhookNotifier {
    async fn notify(&self, job: &Job) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(job)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Collaborators invoked, fire-and-forget, after a job finishes.
#[derive(Clone)]
pub struct JobHooks {
    pub persistence: Arc<dyn JobPersistence>,
    pub notifier: Arc<dyn JobNotifier>,
}

impl JobHooks {
    /// Run both hooks on a detached task. Failures are logged and never
    /// reach the job.
    pub fn fire(&self, job: Job) {
        let hooks = self.clone();
        tokio::spawn(async move {
            if let Err(e) = hooks.persistence.save(&job).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to persist job");
            }
            if let Err(e) = hooks.notifier.notify(&job).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to notify job completion");
            }
        });
    }
}

impl Default for JobHooks {
    fn default() -> Self {
        Self {
            persistence: Arc::new(NoopPersistence),
            notifier: Arc::new(NoopNotifier),
        }
    }
}
