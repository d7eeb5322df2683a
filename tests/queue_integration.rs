//! End-to-end tests for the job queue and its worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

use toolgate::config::{MetricsConfig, QueueConfig};
use toolgate::context::ExecutionContext;
use toolgate::error::ToolError;
use toolgate::executor::ToolExecutor;
use toolgate::metrics::MetricsCollector;
use toolgate::tools::builtin::register_builtins;
use toolgate::tools::{Tool, ToolOutput, ToolRegistry};
use toolgate::worker::{
    Job, JobHooks, JobNotifier, JobQueue, JobStatus, NoopPersistence, Priority, RetryPolicy,
    WATCHDOG_ERROR_TYPE,
};

// ── Test tools ──────────────────────────────────────────────────────────

/// Records the job ids it runs, in order.
struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for Recorder {
    fn name(&self) -> &str {
        "record"
    }
    fn description(&self) -> &str {
        "records job ids"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _params: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let id = ctx.job_id.clone().unwrap_or_default();
        self.seen.lock().await.push(id);
        Ok(ToolOutput::new(json!({"ok": true})))
    }
}

/// Always fails with a retryable error.
struct Flaky;

#[async_trait]
impl Tool for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            name: "flaky".to_string(),
            reason: "upstream unavailable".to_string(),
        })
    }
}

/// Fails its first call, then succeeds.
#[derive(Default)]
struct FailOnce {
    calls: AtomicUsize,
}

#[async_trait]
impl Tool for FailOnce {
    fn name(&self) -> &str {
        "fail_once"
    }
    fn description(&self) -> &str {
        "fails the first call"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ToolError::ExecutionFailed {
                name: "fail_once".to_string(),
                reason: "cold start".to_string(),
            });
        }
        Ok(ToolOutput::new(json!("warm")))
    }
}

/// Tracks how many executions overlap.
struct Overlap {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Tool for Overlap {
    fn name(&self) -> &str {
        "overlap"
    }
    fn description(&self) -> &str {
        "measures concurrency"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolOutput::new(json!(null)))
    }
}

/// Blocks its runtime thread, out of reach of the async timeout.
struct Blocking;

#[async_trait]
impl Tool for Blocking {
    fn name(&self) -> &str {
        "blocking"
    }
    fn description(&self) -> &str {
        "blocks the thread"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        std::thread::sleep(Duration::from_millis(800));
        Ok(ToolOutput::new(json!("late")))
    }
}

struct ChannelNotifier(mpsc::UnboundedSender<Job>);

#[async_trait]
impl JobNotifier for ChannelNotifier {
    async fn notify(&self, job: &Job) -> anyhow::Result<()> {
        self.0.send(job.clone())?;
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

async fn build(config: QueueConfig, tools: Vec<Arc<dyn Tool>>, hooks: JobHooks) -> Arc<JobQueue> {
    let registry = Arc::new(ToolRegistry::new());
    register_builtins(&registry).await;
    for tool in tools {
        registry.register(tool).await;
    }
    let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()));
    let executor = Arc::new(ToolExecutor::new(registry, metrics));
    Arc::new(JobQueue::with_hooks(config, executor, hooks))
}

fn single_worker() -> QueueConfig {
    QueueConfig {
        max_workers: 1,
        retry: RetryPolicy::immediate(),
        ..QueueConfig::default()
    }
}

/// Poll until the job reaches a terminal status.
async fn wait_terminal(queue: &JobQueue, id: &str) -> Job {
    for _ in 0..500 {
        if let Some(job) = queue.get_status(id).await
            && job.status.is_terminal()
        {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

/// Ten-second fixed backoff, with a watchdog that would fire well inside it
/// if the deadline were not pushed past the wait.
fn slow_backoff() -> QueueConfig {
    QueueConfig {
        max_workers: 1,
        job_timeout: Duration::from_secs(1),
        watchdog_grace: Duration::from_secs(1),
        sweep_interval: Duration::from_millis(500),
        retry: RetryPolicy {
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
        },
        ..QueueConfig::default()
    }
}

/// Spin without letting a paused clock auto-advance.
async fn spin_until(queue: &JobQueue, id: &str, done: impl Fn(&Job) -> bool) -> Job {
    for _ in 0..1_000 {
        if let Some(job) = queue.get_status(id).await
            && done(&job)
        {
            return job;
        }
        tokio::task::yield_now().await;
    }
    panic!("job {id} never reached the expected state");
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn dispatches_by_priority_then_fifo() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = build(
        single_worker(),
        vec![Arc::new(Recorder { seen: Arc::clone(&seen) })],
        JobHooks::default(),
    )
    .await;

    let low = queue.enqueue("record", json!({}), "u", Priority::Low, 0).await.unwrap();
    let high = queue.enqueue("record", json!({}), "u", Priority::High, 0).await.unwrap();
    let normal = queue.enqueue("record", json!({}), "u", Priority::Normal, 0).await.unwrap();

    queue.start().await;
    wait_terminal(&queue, &low).await;
    queue.stop().await;

    assert_eq!(*seen.lock().await, vec![high, normal, low]);
}

#[tokio::test]
async fn retries_are_bounded() {
    let queue = build(single_worker(), vec![Arc::new(Flaky)], JobHooks::default()).await;
    queue.start().await;

    let id = queue.enqueue("flaky", json!({}), "u", Priority::Normal, 2).await.unwrap();
    let job = wait_terminal(&queue, &id).await;
    queue.stop().await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retries, 2);
    assert_eq!(job.error_type.as_deref(), Some("execution_error"));
    assert!(job.error.unwrap().contains("upstream unavailable"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn non_retryable_errors_fail_immediately() {
    let queue = build(single_worker(), vec![], JobHooks::default()).await;
    queue.start().await;

    let id = queue
        .enqueue("sleep", json!({"duration_ms": "soon"}), "u", Priority::Normal, 3)
        .await
        .unwrap();
    let job = wait_terminal(&queue, &id).await;
    queue.stop().await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retries, 0);
    assert_eq!(job.error_type.as_deref(), Some("invalid_parameters"));
}

#[tokio::test]
async fn timed_out_jobs_record_timeout() {
    let config = QueueConfig {
        job_timeout: Duration::from_millis(50),
        ..single_worker()
    };
    let queue = build(config, vec![], JobHooks::default()).await;
    queue.start().await;

    let id = queue
        .enqueue("sleep", json!({"duration_ms": 5_000}), "u", Priority::Normal, 0)
        .await
        .unwrap();
    let job = wait_terminal(&queue, &id).await;
    queue.stop().await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn processing_never_exceeds_worker_count() {
    let tool = Arc::new(Overlap {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let config = QueueConfig {
        max_workers: 2,
        ..QueueConfig::default()
    };
    let queue = build(config, vec![tool.clone() as Arc<dyn Tool>], JobHooks::default()).await;

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(queue.enqueue("overlap", json!({}), "u", Priority::Normal, 0).await.unwrap());
    }
    queue.start().await;

    let mut finished = 0;
    while finished < ids.len() {
        let stats = queue.get_stats().await;
        assert!(stats.processing <= 2, "{stats:?}");
        assert!(stats.workers_busy <= 2);
        finished = stats.completed;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    queue.stop().await;

    assert!(tool.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(tool.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn status_only_moves_forward() {
    let config = QueueConfig {
        max_workers: 1,
        ..QueueConfig::default()
    };
    let queue = build(config, vec![], JobHooks::default()).await;
    queue.start().await;

    let id = queue
        .enqueue("sleep", json!({"duration_ms": 50}), "u", Priority::Normal, 0)
        .await
        .unwrap();

    let rank = |s: JobStatus| match s {
        JobStatus::Pending => 0,
        JobStatus::Processing => 1,
        _ => 2,
    };
    let mut last = JobStatus::Pending;
    loop {
        let status = queue.get_status(&id).await.unwrap().status;
        assert!(rank(status) >= rank(last), "{last} -> {status}");
        if status != last {
            assert!(last.can_transition_to(status), "{last} -> {status}");
        }
        last = status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    queue.stop().await;
    assert_eq!(last, JobStatus::Completed);
}

#[tokio::test]
async fn cancelled_jobs_never_run() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = build(
        single_worker(),
        vec![Arc::new(Recorder { seen: Arc::clone(&seen) })],
        JobHooks::default(),
    )
    .await;

    let doomed = queue.enqueue("record", json!({}), "alice", Priority::High, 0).await.unwrap();
    let kept = queue.enqueue("record", json!({}), "alice", Priority::Low, 0).await.unwrap();
    assert!(!queue.cancel_job(&doomed, "bob").await);
    assert!(queue.cancel_job(&doomed, "alice").await);

    queue.start().await;
    wait_terminal(&queue, &kept).await;
    assert!(!queue.cancel_job(&kept, "alice").await);
    queue.stop().await;

    assert_eq!(*seen.lock().await, vec![kept]);
    let doomed = queue.get_status(&doomed).await.unwrap();
    assert_eq!(doomed.status, JobStatus::Cancelled);
    assert!(doomed.started_at.is_none());
}

#[tokio::test]
async fn views_and_queries_are_owner_aware() {
    let queue = build(single_worker(), vec![], JobHooks::default()).await;
    queue.start().await;

    let id = queue
        .enqueue("echo", json!({"secret": "s3cr3t"}), "alice", Priority::Normal, 0)
        .await
        .unwrap();
    let bobs = queue.enqueue("echo", json!({}), "bob", Priority::Normal, 0).await.unwrap();
    wait_terminal(&queue, &id).await;
    wait_terminal(&queue, &bobs).await;

    let own = queue.get_view(&id, "alice").await.unwrap();
    assert_eq!(own.result, Some(json!({"secret": "s3cr3t"})));
    let other = queue.get_view(&id, "bob").await.unwrap();
    assert_eq!(other.status, JobStatus::Completed);
    assert!(other.result.is_none());

    assert_eq!(queue.get_jobs_by_user("alice").await.len(), 1);
    assert!(queue.get_view("missing", "alice").await.is_none());

    let listed = queue.get_views_by_user("alice", "bob").await;
    assert_eq!(listed.len(), 1);
    assert!(listed[0].result.is_none());

    let completed = queue.get_views_by_status(JobStatus::Completed, "bob").await;
    assert_eq!(completed.len(), 2);
    for view in &completed {
        if view.user_id == "alice" {
            assert!(view.result.is_none());
        } else {
            assert_eq!(view.result, Some(json!({})));
        }
    }
    queue.stop().await;
    assert_eq!(queue.get_jobs_by_status(JobStatus::Completed).await.len(), 2);
}

#[tokio::test]
async fn hooks_fire_for_completed_and_failed_jobs() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let hooks = JobHooks {
        persistence: Arc::new(NoopPersistence),
        notifier: Arc::new(ChannelNotifier(tx)),
    };
    let queue = build(single_worker(), vec![Arc::new(Flaky)], hooks).await;
    queue.start().await;

    let ok = queue.enqueue("echo", json!({}), "u", Priority::High, 0).await.unwrap();
    let bad = queue.enqueue("flaky", json!({}), "u", Priority::Low, 0).await.unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    queue.stop().await;

    assert_eq!(first.id, ok);
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.id, bad);
    assert_eq!(second.status, JobStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn watchdog_fails_blocked_jobs() {
    let config = QueueConfig {
        max_workers: 1,
        job_timeout: Duration::from_millis(100),
        watchdog_grace: Duration::from_millis(100),
        sweep_interval: Duration::from_millis(50),
        ..QueueConfig::default()
    };
    let queue = build(config, vec![Arc::new(Blocking)], JobHooks::default()).await;
    queue.start().await;

    let id = queue.enqueue("blocking", json!({}), "u", Priority::Normal, 0).await.unwrap();
    let job = wait_terminal(&queue, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type.as_deref(), Some(WATCHDOG_ERROR_TYPE));

    // The blocked worker eventually returns; its result is dropped.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let job = queue.get_status(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());
    assert_eq!(queue.get_stats().await.workers_busy, 0);
    queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn backoff_keeps_the_job_processing_in_its_slot() {
    let tool = Arc::new(FailOnce::default());
    let queue = build(
        slow_backoff(),
        vec![tool.clone() as Arc<dyn Tool>],
        JobHooks::default(),
    )
    .await;
    queue.start().await;

    let id = queue
        .enqueue("fail_once", json!({}), "u", Priority::Normal, 1)
        .await
        .unwrap();
    let job = spin_until(&queue, &id, |job| job.retries == 1).await;
    assert_eq!(job.status, JobStatus::Processing);

    tokio::time::advance(Duration::from_secs(5)).await;
    let job = spin_until(&queue, &id, |_| true).await;
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.get_stats().await.workers_busy, 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    let job = spin_until(&queue, &id, |job| job.status.is_terminal()).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!("warm")));
    assert_eq!(job.retries, 1);
    assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_cuts_a_pending_backoff_short() {
    let queue = build(slow_backoff(), vec![Arc::new(Flaky)], JobHooks::default()).await;
    queue.start().await;

    let id = queue.enqueue("flaky", json!({}), "u", Priority::Normal, 1).await.unwrap();
    spin_until(&queue, &id, |job| job.retries == 1).await;

    let stopping = tokio::time::Instant::now();
    queue.stop().await;
    assert!(stopping.elapsed() < Duration::from_secs(10));

    let job = queue.get_status(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retries, 1);
}
