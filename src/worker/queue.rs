//! Priority job queue drained by a bounded worker pool.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::hooks::JobHooks;
use super::job::{Job, JobView};
use super::state::{JobStatus, Priority};
use super::watchdog;
use super::worker::Worker;
use crate::config::QueueConfig;
use crate::error::{QueueError, ToolError};
use crate::executor::ToolExecutor;

/// Heap entry. Ordered by priority, then by enqueue sequence (earliest
/// first), so the max-heap pops the oldest job of the highest tier.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Queued {
    priority: Priority,
    seq: Reverse<u64>,
    id: String,
}

/// Everything guarded by the queue lock.
#[derive(Default)]
pub(super) struct QueueState {
    pub(super) jobs: HashMap<String, Job>,
    heap: BinaryHeap<Queued>,
    /// Jobs with status `Pending`. Cancelled heap entries are skipped lazily.
    pending: usize,
    next_seq: u64,
    /// Jobs held by a worker, with the instant their current attempt is overdue.
    pub(super) in_flight: HashMap<String, Instant>,
    /// Workers currently holding a job, including stuck ones.
    busy: usize,
    pub(super) processed: u64,
    pub(super) processing_time_ms: u64,
}

impl QueueState {
    /// Record a finished job's processing time for the running average.
    pub(super) fn account(&mut self, job: &Job) {
        if let Some(ms) = job.processing_time_ms() {
            self.processed += 1;
            self.processing_time_ms += ms;
        }
    }
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub workers_busy: usize,
    pub workers_total: usize,
    pub avg_processing_time_ms: f64,
}

/// Job queue with a fixed pool of workers.
///
/// Retries run inside the worker that picked the job up: the job stays
/// `Processing` through its backoff, so no more than `max_workers` jobs are
/// ever processing and no status is revisited.
pub struct JobQueue {
    pub(super) config: QueueConfig,
    pub(super) executor: Arc<ToolExecutor>,
    pub(super) hooks: JobHooks,
    pub(super) state: Mutex<QueueState>,
    notify: Notify,
    pub(super) shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig, executor: Arc<ToolExecutor>) -> Self {
        Self::with_hooks(config, executor, JobHooks::default())
    }

    pub fn with_hooks(config: QueueConfig, executor: Arc<ToolExecutor>, hooks: JobHooks) -> Self {
        Self {
            config,
            executor,
            hooks,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate and queue a job. Returns its id without waiting for a worker.
    pub async fn enqueue(
        &self,
        tool_id: &str,
        parameters: Value,
        user_id: &str,
        priority: Priority,
        max_retries: u32,
    ) -> Result<String, QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::NotRunning);
        }
        if tool_id.trim().is_empty() {
            return Err(invalid("tool_id must not be empty"));
        }
        if user_id.trim().is_empty() {
            return Err(invalid("user_id must not be empty"));
        }
        let parameters = match parameters {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => Value::Object(map),
            _ => return Err(invalid("parameters must be a JSON object")),
        };
        if max_retries > self.config.max_retries_cap {
            return Err(invalid(&format!(
                "max_retries must be at most {}",
                self.config.max_retries_cap
            )));
        }
        if !self.executor.registry().has(tool_id).await {
            return Err(invalid(&format!("unknown tool '{tool_id}'")));
        }

        let job = Job::new(tool_id, parameters, user_id, priority, max_retries);
        let id = job.id.clone();
        {
            let mut state = self.state.lock().await;
            if state.pending >= self.config.max_pending {
                return Err(QueueError::QueueFull {
                    capacity: self.config.max_pending,
                });
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Queued {
                priority,
                seq: Reverse(seq),
                id: id.clone(),
            });
            state.pending += 1;
            state.jobs.insert(id.clone(), job);
        }
        self.notify.notify_one();

        info!(job_id = %id, tool_id, user_id, %priority, "Job enqueued");
        Ok(id)
    }

    pub async fn get_status(&self, job_id: &str) -> Option<Job> {
        self.state.lock().await.jobs.get(job_id).cloned()
    }

    /// Job as seen by `viewer`; outcome fields are hidden from non-owners.
    pub async fn get_view(&self, job_id: &str, viewer: &str) -> Option<JobView> {
        self.state
            .lock()
            .await
            .jobs
            .get(job_id)
            .map(|job| job.view_for(viewer))
    }

    /// Snapshot of one user's jobs, oldest first.
    pub async fn get_jobs_by_user(&self, user_id: &str) -> Vec<Job> {
        self.collect(|job| job.user_id == user_id).await
    }

    /// Snapshot of the jobs in `status`, oldest first.
    pub async fn get_jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.collect(|job| job.status == status).await
    }

    /// One user's jobs as seen by `viewer`, oldest first.
    pub async fn get_views_by_user(&self, user_id: &str, viewer: &str) -> Vec<JobView> {
        views(self.get_jobs_by_user(user_id).await, viewer)
    }

    /// Jobs in `status` as seen by `viewer`, oldest first.
    pub async fn get_views_by_status(&self, status: JobStatus, viewer: &str) -> Vec<JobView> {
        views(self.get_jobs_by_status(status).await, viewer)
    }

    async fn collect(&self, filter: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .state
            .lock()
            .await
            .jobs
            .values()
            .filter(|&job| filter(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Cancel a pending job. Returns false for unknown jobs, jobs owned by
    /// someone else, and jobs a worker already picked up.
    pub async fn cancel_job(&self, job_id: &str, requesting_user_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(job_id) else {
            return false;
        };
        if job.user_id != requesting_user_id || job.transition_to(JobStatus::Cancelled).is_err() {
            return false;
        }
        state.pending -= 1;
        info!(job_id, user_id = requesting_user_id, "Job cancelled");
        true
    }

    pub async fn get_stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            total: state.jobs.len(),
            workers_busy: state.busy,
            workers_total: self.config.max_workers,
            ..QueueStats::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        if state.processed > 0 {
            stats.avg_processing_time_ms =
                state.processing_time_ms as f64 / state.processed as f64;
        }
        stats
    }

    /// Remove terminal jobs that finished more than `older_than` ago.
    pub async fn purge_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - age;
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|t| t < cutoff))
        });
        let removed = before - state.jobs.len();
        if removed > 0 {
            debug!(removed, "Purged finished jobs");
        }
        removed
    }

    /// Spawn the worker pool and the watchdog sweep. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        for id in 0..self.config.max_workers {
            let worker = Worker::new(id, Arc::clone(self));
            tasks.push(tokio::spawn(worker.run()));
        }
        tasks.push(watchdog::spawn(Arc::clone(self)));
        info!(workers = self.config.max_workers, "Job queue started");
    }

    /// Stop taking work and wait for workers to finish their current job.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.notify.notify_waiters();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Job queue stopped");
    }

    /// Wait for the next pending job and mark it processing.
    /// Returns `None` once the queue is shutting down.
    pub(super) async fn next_job(&self) -> Option<Job> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            if let Some(job) = self.dispatch().await {
                return Some(job);
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    async fn dispatch(&self) -> Option<Job> {
        let mut state = self.state.lock().await;
        while let Some(Queued { id, .. }) = state.heap.pop() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.transition_to(JobStatus::Processing).is_err() {
                continue;
            }
            let job = job.clone();
            state.pending -= 1;
            state.busy += 1;
            let deadline = Instant::now() + self.attempt_budget(Duration::ZERO);
            state.in_flight.insert(id, deadline);
            return Some(job);
        }
        None
    }

    /// Time an attempt may take, after `delay`, before the watchdog steps in.
    fn attempt_budget(&self, delay: Duration) -> Duration {
        delay + self.config.job_timeout + self.config.watchdog_grace
    }

    /// Count a retry and push the watchdog deadline past its backoff.
    /// Returns `None` when the job is no longer held by this worker.
    pub(super) async fn begin_retry(&self, job_id: &str, delay: Duration) -> Option<u32> {
        let mut state = self.state.lock().await;
        if !state.in_flight.contains_key(job_id) {
            return None;
        }
        let deadline = Instant::now() + self.attempt_budget(delay);
        state.in_flight.insert(job_id.to_string(), deadline);
        let job = state.jobs.get_mut(job_id)?;
        job.retries += 1;
        Some(job.retries)
    }

    /// Release a worker's job with its final outcome. Outcomes for jobs the
    /// watchdog already failed are dropped.
    pub(super) async fn settle(&self, job_id: &str, outcome: Result<Value, ToolError>) {
        let finished = {
            let mut state = self.state.lock().await;
            state.busy = state.busy.saturating_sub(1);
            if state.in_flight.remove(job_id).is_none() {
                debug!(job_id, "Discarding outcome of a job the watchdog already failed");
                return;
            }
            let Some(job) = state.jobs.get_mut(job_id) else {
                return;
            };
            let target = match outcome {
                Ok(result) => {
                    job.result = Some(result);
                    JobStatus::Completed
                }
                Err(err) => {
                    job.error = Some(err.to_string());
                    job.error_type = Some(err.error_type().to_string());
                    JobStatus::Failed
                }
            };
            if let Err(e) = job.transition_to(target) {
                tracing::warn!(job_id, error = %e, "Unexpected job transition");
                return;
            }
            let job = job.clone();
            state.account(&job);
            job
        };

        match finished.status {
            JobStatus::Completed => info!(
                job_id,
                tool_id = %finished.tool_id,
                retries = finished.retries,
                "Job completed"
            ),
            _ => tracing::warn!(
                job_id,
                tool_id = %finished.tool_id,
                retries = finished.retries,
                error_type = finished.error_type.as_deref().unwrap_or("unknown"),
                "Job failed"
            ),
        }
        self.hooks.fire(finished);
    }
}

fn views(jobs: Vec<Job>, viewer: &str) -> Vec<JobView> {
    jobs.iter().map(|job| job.view_for(viewer)).collect()
}

fn invalid(reason: &str) -> QueueError {
    QueueError::Validation {
        reason: reason.to_string(),
    }
}
