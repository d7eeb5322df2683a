//! Metrics collector: running aggregates over execution outcomes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::alerts::{AlertSink, LogAlertSink};
use super::record::{
    ErrorAnalysis, MetricRecord, Report, ReportPeriod, SystemStats, ToolStats,
};
use crate::config::MetricsConfig;

/// System-wide counters. Updated before a record is appended and after it is
/// removed, so a concurrent prune can never drive them below zero.
#[derive(Default)]
struct Totals {
    executions: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    execution_time_ms: AtomicU64,
    api_calls: AtomicU64,
}

/// Aggregates execution outcomes into tool and system statistics.
///
/// Per-tool and per-user state is sharded; only the append-only record log
/// sits behind a single lock, held just long enough to push or prune.
pub struct MetricsCollector {
    config: MetricsConfig,
    records: RwLock<VecDeque<MetricRecord>>,
    tools: DashMap<String, ToolStats>,
    users: DashMap<String, u64>,
    totals: Totals,
    alerts: Arc<dyn AlertSink>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        let alerts = Arc::new(LogAlertSink::new(
            config.error_rate_threshold,
            config.min_executions_for_recommendation,
        ));
        Self::with_alerts(config, alerts)
    }

    pub fn with_alerts(config: MetricsConfig, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            config,
            records: RwLock::new(VecDeque::new()),
            tools: DashMap::new(),
            users: DashMap::new(),
            totals: Totals::default(),
            alerts,
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Record one execution outcome.
    pub async fn track(&self, record: MetricRecord) {
        let snapshot = {
            let mut stats = self
                .tools
                .entry(record.tool_id.clone())
                .or_insert_with(|| ToolStats::new(&record.tool_id));
            stats.add(&record);
            (!record.success).then(|| stats.clone())
        };
        *self.users.entry(record.user_id.clone()).or_default() += 1;

        self.totals.executions.fetch_add(1, Ordering::Relaxed);
        if !record.success {
            self.totals.failed.fetch_add(1, Ordering::Relaxed);
        }
        if record.cache_hit {
            self.totals.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.totals
            .execution_time_ms
            .fetch_add(record.execution_time_ms, Ordering::Relaxed);
        self.totals
            .api_calls
            .fetch_add(u64::from(record.api_calls), Ordering::Relaxed);

        if let Some(stats) = snapshot {
            self.alerts.on_failure(&record, &stats);
        }

        let evicted: Vec<MetricRecord> = {
            let mut records = self.records.write().await;
            records.push_back(record);
            let overflow = records.len().saturating_sub(self.config.max_records);
            records.drain(..overflow).collect()
        };
        for old in &evicted {
            self.forget(old);
        }
    }

    /// Take a record's contribution back out of every aggregate.
    fn forget(&self, record: &MetricRecord) {
        let emptied = match self.tools.get_mut(&record.tool_id) {
            Some(mut stats) => {
                stats.remove(record);
                stats.total_executions == 0
            }
            None => false,
        };
        if emptied {
            self.tools
                .remove_if(&record.tool_id, |_, s| s.total_executions == 0);
        }

        let user_gone = match self.users.get_mut(&record.user_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if user_gone {
            self.users.remove_if(&record.user_id, |_, c| *c == 0);
        }

        self.totals.executions.fetch_sub(1, Ordering::Relaxed);
        if !record.success {
            self.totals.failed.fetch_sub(1, Ordering::Relaxed);
        }
        if record.cache_hit {
            self.totals.cache_hits.fetch_sub(1, Ordering::Relaxed);
        }
        self.totals
            .execution_time_ms
            .fetch_sub(record.execution_time_ms, Ordering::Relaxed);
        self.totals
            .api_calls
            .fetch_sub(u64::from(record.api_calls), Ordering::Relaxed);
    }

    pub fn get_tool_stats(&self, tool_id: &str) -> Option<ToolStats> {
        self.tools.get(tool_id).map(|s| s.clone())
    }

    pub fn get_system_stats(&self) -> SystemStats {
        let total = self.totals.executions.load(Ordering::Relaxed);
        let failed = self.totals.failed.load(Ordering::Relaxed);
        let cache_hits = self.totals.cache_hits.load(Ordering::Relaxed);
        let time_ms = self.totals.execution_time_ms.load(Ordering::Relaxed);
        let total_cost = self
            .tools
            .iter()
            .fold(Decimal::ZERO, |acc, s| acc + s.total_cost);

        SystemStats {
            total_executions: total,
            active_users: self.users.len(),
            tools_used: self.tools.len(),
            avg_response_time_ms: ratio(time_ms, total),
            error_rate: ratio(failed, total) * 100.0,
            cache_hit_rate: ratio(cache_hits, total) * 100.0,
            total_api_calls: self.totals.api_calls.load(Ordering::Relaxed),
            total_cost,
        }
    }

    /// Busiest tools first; ties broken by tool id.
    pub fn get_top_tools(&self, limit: usize) -> Vec<ToolStats> {
        let mut tools: Vec<ToolStats> = self.tools.iter().map(|s| s.clone()).collect();
        sort_busiest_first(&mut tools);
        tools.truncate(limit);
        tools
    }

    /// Failures grouped by tool and by type, plus the `recent` latest failures.
    pub async fn get_error_analysis(&self, recent: usize) -> ErrorAnalysis {
        let mut by_tool = HashMap::new();
        let mut by_error_type: HashMap<String, u64> = HashMap::new();
        for stats in self.tools.iter() {
            if stats.failed > 0 {
                by_tool.insert(stats.tool_id.clone(), stats.failed);
            }
            for (kind, count) in &stats.errors_by_type {
                *by_error_type.entry(kind.clone()).or_default() += count;
            }
        }

        let records = self.records.read().await;
        let recent = records
            .iter()
            .rev()
            .filter(|r| !r.success)
            .take(recent)
            .cloned()
            .collect();

        ErrorAnalysis {
            total_errors: self.totals.failed.load(Ordering::Relaxed),
            by_tool,
            by_error_type,
            recent,
        }
    }

    /// Aggregate the records that fall inside `period`, ending now.
    pub async fn generate_report(&self, period: ReportPeriod) -> Report {
        let to = Utc::now();
        let from = to - period.duration();

        let mut tools: HashMap<String, ToolStats> = HashMap::new();
        let mut users = HashSet::new();
        {
            let records = self.records.read().await;
            for record in records
                .iter()
                .filter(|r| r.timestamp >= from && r.timestamp <= to)
            {
                tools
                    .entry(record.tool_id.clone())
                    .or_insert_with(|| ToolStats::new(&record.tool_id))
                    .add(record);
                users.insert(record.user_id.clone());
            }
        }

        let mut tools: Vec<ToolStats> = tools.into_values().collect();
        sort_busiest_first(&mut tools);

        let total: u64 = tools.iter().map(|t| t.total_executions).sum();
        let failed: u64 = tools.iter().map(|t| t.failed).sum();
        let cache_hits: u64 = tools.iter().map(|t| t.cache_hits).sum();
        let time_ms: u64 = tools.iter().map(|t| t.total_execution_time_ms).sum();

        let summary = SystemStats {
            total_executions: total,
            active_users: users.len(),
            tools_used: tools.len(),
            avg_response_time_ms: ratio(time_ms, total),
            error_rate: ratio(failed, total) * 100.0,
            cache_hit_rate: ratio(cache_hits, total) * 100.0,
            total_api_calls: tools.iter().map(|t| t.total_api_calls).sum(),
            total_cost: tools.iter().fold(Decimal::ZERO, |acc, t| acc + t.total_cost),
        };
        let recommendations = self.recommendations(&summary, &tools);

        Report {
            period,
            from,
            to,
            summary,
            tools,
            recommendations,
        }
    }

    fn recommendations(&self, summary: &SystemStats, tools: &[ToolStats]) -> Vec<String> {
        let min = self.config.min_executions_for_recommendation;
        let mut out = Vec::new();

        for tool in tools.iter().filter(|t| t.total_executions >= min) {
            if tool.error_rate >= self.config.error_rate_threshold {
                out.push(format!(
                    "Investigate tool {}: error rate {:.1}% over {} executions",
                    tool.tool_id, tool.error_rate, tool.total_executions
                ));
            }
            if tool.avg_execution_time_ms >= self.config.slow_tool_threshold_ms {
                out.push(format!(
                    "Optimize tool {}: average execution time {:.0} ms",
                    tool.tool_id, tool.avg_execution_time_ms
                ));
            }
        }

        if summary.total_executions >= min
            && summary.cache_hit_rate < self.config.low_cache_hit_threshold
        {
            out.push(format!(
                "Cache hit rate is {:.1}%; consider enabling caching for frequently repeated calls",
                summary.cache_hit_rate
            ));
        }

        if out.is_empty() {
            out.push("All tools are operating within thresholds".to_string());
        }
        out
    }

    /// Drop records outside the retention window or beyond the record cap.
    /// Returns the number removed.
    pub async fn prune(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.retention_days));
        self.prune_before(cutoff).await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let removed: VecDeque<MetricRecord> = {
            let mut records = self.records.write().await;
            let (kept, removed): (VecDeque<_>, VecDeque<_>) =
                records.drain(..).partition(|r| r.timestamp >= cutoff);
            *records = kept;
            removed
        };
        for record in &removed {
            self.forget(record);
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Pruned expired metric records");
        }
        removed.len()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Spawn the periodic retention sweep. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }
        let collector = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        collector.prune().await;
                    }
                }
            }
            debug!("Metrics sweep stopped");
        }));
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.lock().await.take() {
            let _ = handle.await;
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn sort_busiest_first(tools: &mut [ToolStats]) {
    tools.sort_by(|a, b| {
        b.total_executions
            .cmp(&a.total_executions)
            .then_with(|| a.tool_id.cmp(&b.tool_id))
    });
}
