//! Admission through the gateway into calls and queued jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use toolgate::config::{GatewayConfig, LimiterConfig, QueueConfig};
use toolgate::context::ExecutionContext;
use toolgate::error::{Error, ToolError};
use toolgate::gateway::{CallerIdentity, Gateway};
use toolgate::limiter::RateLimitConfig;
use toolgate::tools::{Tool, ToolOutput};
use toolgate::worker::{JobStatus, Priority, RetryPolicy};

/// Expensive tool with its own per-user quota of one call a minute.
struct Scarce;

#[async_trait]
impl Tool for Scarce {
    fn name(&self) -> &str {
        "scarce"
    }
    fn description(&self) -> &str {
        "rate limited per tool"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn rate_limit(&self) -> Option<RateLimitConfig> {
        Some(RateLimitConfig::new(1, Duration::from_secs(60)))
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::new(json!("done")))
    }
}

fn config() -> GatewayConfig {
    GatewayConfig {
        queue: QueueConfig {
            max_workers: 2,
            retry: RetryPolicy::immediate(),
            ..QueueConfig::default()
        },
        limiter: LimiterConfig {
            user: RateLimitConfig::new(3, Duration::from_secs(60)),
            global: Some(RateLimitConfig::new(1_000, Duration::from_secs(60))),
            ip: Some(RateLimitConfig::new(100, Duration::from_secs(60))),
            burst: None,
            ..LimiterConfig::default()
        },
        ..GatewayConfig::default()
    }
}

async fn wait_done(gateway: &Gateway, caller: &CallerIdentity, id: &str) {
    for _ in 0..500 {
        if let Some(view) = gateway.job_view(caller, id).await
            && view.status.is_terminal()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn submitted_jobs_run_and_redact_for_others() {
    let gateway = Gateway::new(config()).await.unwrap();
    gateway.start().await;

    let alice = CallerIdentity::new("alice").with_ip("10.0.0.1");
    let bob = CallerIdentity::new("bob");
    let id = gateway
        .submit(&alice, "echo", json!({"note": "private"}), Priority::High, 0)
        .await
        .unwrap();
    wait_done(&gateway, &alice, &id).await;

    let own = gateway.job_view(&alice, &id).await.unwrap();
    assert_eq!(own.status, JobStatus::Completed);
    assert_eq!(own.result, Some(json!({"note": "private"})));

    let other = gateway.job_view(&bob, &id).await.unwrap();
    assert_eq!(other.status, JobStatus::Completed);
    assert!(other.result.is_none());

    let health = gateway.health().await;
    assert_eq!(health.queue.completed, 1);
    assert_eq!(health.system.total_executions, 1);
    assert!(health.limiter.active_windows >= 3);
    gateway.stop().await;
}

#[tokio::test]
async fn job_lists_redact_other_users_outcomes() {
    let gateway = Gateway::new(config()).await.unwrap();
    gateway.start().await;

    let alice = CallerIdentity::new("alice");
    let bob = CallerIdentity::new("bob");
    let id = gateway
        .submit(&alice, "echo", json!({"token": "abc"}), Priority::Normal, 0)
        .await
        .unwrap();
    wait_done(&gateway, &alice, &id).await;

    let mine = gateway.jobs_of(&alice, "alice").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].result, Some(json!({"token": "abc"})));

    let seen_by_bob = gateway.jobs_of(&bob, "alice").await;
    assert_eq!(seen_by_bob.len(), 1);
    assert_eq!(seen_by_bob[0].id, id);
    assert!(seen_by_bob[0].result.is_none());
    assert!(seen_by_bob[0].error.is_none());

    let completed = gateway.jobs_with_status(&bob, JobStatus::Completed).await;
    assert_eq!(completed.len(), 1);
    assert!(completed[0].result.is_none());

    let json = serde_json::to_value(&completed[0]).unwrap();
    assert!(json.get("result").is_none());
    gateway.stop().await;
}

#[tokio::test]
async fn submits_count_against_the_user_tier() {
    let gateway = Gateway::new(config()).await.unwrap();
    let alice = CallerIdentity::new("alice");

    for _ in 0..3 {
        gateway
            .submit(&alice, "echo", json!({}), Priority::Normal, 0)
            .await
            .unwrap();
    }
    let err = gateway
        .submit(&alice, "echo", json!({}), Priority::Normal, 0)
        .await
        .unwrap_err();
    match err {
        Error::RateLimited { tier, .. } => assert_eq!(tier, "user"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gateway.queue().get_stats().await.pending, 3);
}

#[tokio::test]
async fn tool_tier_applies_per_user() {
    let gateway = Gateway::new(config()).await.unwrap();
    assert!(gateway.registry().register(Arc::new(Scarce)).await);

    let alice = CallerIdentity::new("alice");
    let bob = CallerIdentity::new("bob");
    gateway.call(&alice, "scarce", json!({})).await.unwrap();

    let err = gateway.call(&alice, "scarce", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { ref tier, .. } if tier == "tool"));
    assert!(err.is_retryable());

    gateway.call(&bob, "scarce", json!({})).await.unwrap();
    // The tool tier leaves other tools alone.
    gateway.call(&alice, "echo", json!({})).await.unwrap();
}

#[tokio::test]
async fn ip_tier_is_shared_across_users() {
    let mut config = config();
    config.limiter.ip = Some(RateLimitConfig::new(2, Duration::from_secs(60)));
    let gateway = Gateway::new(config).await.unwrap();

    let a = CallerIdentity::new("a").with_ip("192.0.2.7");
    let b = CallerIdentity::new("b").with_ip("192.0.2.7");
    gateway.call(&a, "echo", json!({})).await.unwrap();
    gateway.call(&b, "echo", json!({})).await.unwrap();

    let err = gateway.call(&a, "echo", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { ref tier, .. } if tier == "ip"));

    // Without an address the ip tier is skipped.
    gateway
        .call(&CallerIdentity::new("c"), "echo", json!({}))
        .await
        .unwrap();
}
