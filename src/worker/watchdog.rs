//! Stuck-job watchdog, finished-job retention, and result-cache expiry sweep.
//!
//! A worker blocked outside the async timeout (a tool doing blocking work on
//! the runtime thread, say) never returns to settle its job. The sweep fails
//! any attempt that has outlived `job_timeout + watchdog_grace`; whatever the
//! worker reports afterwards is discarded.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use super::job::Job;
use super::queue::JobQueue;
use super::state::JobStatus;

/// Error type recorded on jobs failed by the watchdog.
pub const WATCHDOG_ERROR_TYPE: &str = "watchdog_timeout";

impl JobQueue {
    /// Fail every in-flight job whose attempt deadline has passed.
    /// Returns the number of jobs failed.
    pub async fn reap_stuck(&self) -> usize {
        let now = Instant::now();
        let reaped: Vec<Job> = {
            let mut state = self.state.lock().await;
            let overdue: Vec<String> = state
                .in_flight
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();

            let mut reaped = Vec::with_capacity(overdue.len());
            for id in overdue {
                state.in_flight.remove(&id);
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                job.error = Some(format!(
                    "Job exceeded {:?} without finishing",
                    self.config.job_timeout + self.config.watchdog_grace
                ));
                job.error_type = Some(WATCHDOG_ERROR_TYPE.to_string());
                if job.transition_to(JobStatus::Failed).is_ok() {
                    let job = job.clone();
                    state.account(&job);
                    reaped.push(job);
                }
            }
            reaped
        };

        for job in &reaped {
            error!(
                job_id = %job.id,
                tool_id = %job.tool_id,
                retries = job.retries,
                "Watchdog failed stuck job"
            );
            self.hooks.fire(job.clone());
        }
        reaped.len()
    }
}

/// Spawn the periodic sweep: watchdog first, then retention purge, then
/// expired cache entries.
pub(super) fn spawn(queue: Arc<JobQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(queue.config.sweep_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = queue.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    queue.reap_stuck().await;
                    if let Some(retention) = queue.config.finished_retention {
                        queue.purge_finished(retention).await;
                    }
                    let expired = queue.executor.cache().sweep(Instant::now());
                    if expired > 0 {
                        debug!(expired, "Swept expired cached results");
                    }
                }
            }
        }
        debug!("Queue sweep stopped");
    })
}
