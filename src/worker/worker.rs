//! Worker loop: take a job, run it through the executor, retry, settle.

use std::sync::Arc;

use tracing::{debug, info};

use super::job::Job;
use super::queue::JobQueue;
use crate::context::ExecutionContext;

/// One slot of the worker pool.
pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
}

impl Worker {
    pub fn new(id: usize, queue: Arc<JobQueue>) -> Self {
        Self { id, queue }
    }

    /// Process jobs until the queue shuts down.
    pub async fn run(self) {
        debug!(worker_id = self.id, "Worker started");
        while let Some(job) = self.queue.next_job().await {
            self.process(job).await;
        }
        debug!(worker_id = self.id, "Worker stopped");
    }

    /// Run every attempt of one job, then hand the outcome back to the queue.
    async fn process(&self, mut job: Job) {
        info!(
            worker_id = self.id,
            job_id = %job.id,
            tool_id = %job.tool_id,
            "Job dispatched"
        );
        let executor = &self.queue.executor;
        let config = &self.queue.config;

        loop {
            let ctx =
                ExecutionContext::for_job(&job.id, &job.user_id, &job.tool_id, job.retries);
            let outcome = executor
                .invoke(job.parameters.clone(), &ctx, config.job_timeout)
                .await;

            let err = match outcome {
                Ok(invocation) => {
                    self.queue.settle(&job.id, Ok(invocation.output.result)).await;
                    return;
                }
                Err(err) => err,
            };
            if !err.is_retryable() || job.retries >= job.max_retries {
                self.queue.settle(&job.id, Err(err)).await;
                return;
            }

            let delay = config.retry.backoff(job.retries);
            let Some(retries) = self.queue.begin_retry(&job.id, delay).await else {
                // The watchdog failed the job while this attempt ran.
                self.queue.settle(&job.id, Err(err)).await;
                return;
            };
            job.retries = retries;
            debug!(
                job_id = %job.id,
                retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying job"
            );
            tokio::select! {
                _ = self.queue.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
