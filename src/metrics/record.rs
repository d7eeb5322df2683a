//! Metric records and the aggregates derived from them.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One execution outcome. Never mutated after it is tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub tool_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    pub success: bool,
    pub error_type: Option<String>,
    pub api_calls: u32,
    pub estimated_cost: Decimal,
}

impl MetricRecord {
    /// A successful, uncached record stamped now.
    pub fn success(
        tool_id: impl Into<String>,
        user_id: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            execution_time_ms,
            cache_hit: false,
            success: true,
            error_type: None,
            api_calls: 0,
            estimated_cost: Decimal::ZERO,
        }
    }

    /// A failed record stamped now.
    pub fn failure(
        tool_id: impl Into<String>,
        user_id: impl Into<String>,
        execution_time_ms: u64,
        error_type: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_type: Some(error_type.into()),
            ..Self::success(tool_id, user_id, execution_time_ms)
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_usage(mut self, api_calls: u32, estimated_cost: Decimal) -> Self {
        self.api_calls = api_calls;
        self.estimated_cost = estimated_cost;
        self
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Running totals for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStats {
    pub tool_id: String,
    pub total_executions: u64,
    pub successful: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub total_execution_time_ms: u64,
    pub total_api_calls: u64,
    pub total_cost: Decimal,
    pub last_used: Option<DateTime<Utc>>,
    pub errors_by_type: HashMap<String, u64>,
    pub success_rate: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub avg_execution_time_ms: f64,
}

impl ToolStats {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            total_executions: 0,
            successful: 0,
            failed: 0,
            cache_hits: 0,
            total_execution_time_ms: 0,
            total_api_calls: 0,
            total_cost: Decimal::ZERO,
            last_used: None,
            errors_by_type: HashMap::new(),
            success_rate: 0.0,
            error_rate: 0.0,
            cache_hit_rate: 0.0,
            avg_execution_time_ms: 0.0,
        }
    }

    /// Fold a record into the totals.
    pub fn add(&mut self, record: &MetricRecord) {
        self.total_executions += 1;
        if record.success {
            self.successful += 1;
        } else {
            self.failed += 1;
            let kind = record.error_type.as_deref().unwrap_or("unknown");
            *self.errors_by_type.entry(kind.to_string()).or_default() += 1;
        }
        if record.cache_hit {
            self.cache_hits += 1;
        }
        self.total_execution_time_ms += record.execution_time_ms;
        self.total_api_calls += u64::from(record.api_calls);
        self.total_cost += record.estimated_cost;
        if self.last_used.is_none_or(|t| record.timestamp > t) {
            self.last_used = Some(record.timestamp);
        }
        self.refresh_rates();
    }

    /// Take a previously added record back out of the totals.
    ///
    /// `last_used` is left alone: it only ever moves forward.
    pub fn remove(&mut self, record: &MetricRecord) {
        self.total_executions = self.total_executions.saturating_sub(1);
        if record.success {
            self.successful = self.successful.saturating_sub(1);
        } else {
            self.failed = self.failed.saturating_sub(1);
            let kind = record.error_type.as_deref().unwrap_or("unknown");
            if let Some(count) = self.errors_by_type.get_mut(kind) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.errors_by_type.remove(kind);
                }
            }
        }
        if record.cache_hit {
            self.cache_hits = self.cache_hits.saturating_sub(1);
        }
        self.total_execution_time_ms = self
            .total_execution_time_ms
            .saturating_sub(record.execution_time_ms);
        self.total_api_calls = self
            .total_api_calls
            .saturating_sub(u64::from(record.api_calls));
        self.total_cost -= record.estimated_cost;
        self.refresh_rates();
    }

    fn refresh_rates(&mut self) {
        self.success_rate = percent(self.successful, self.total_executions);
        self.error_rate = percent(self.failed, self.total_executions);
        self.cache_hit_rate = percent(self.cache_hits, self.total_executions);
        self.avg_execution_time_ms = if self.total_executions == 0 {
            0.0
        } else {
            self.total_execution_time_ms as f64 / self.total_executions as f64
        };
    }
}

/// System-wide view over the retention window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    pub total_executions: u64,
    pub active_users: usize,
    pub tools_used: usize,
    pub avg_response_time_ms: f64,
    /// Percent of executions that failed.
    pub error_rate: f64,
    /// Percent of executions served from cache.
    pub cache_hit_rate: f64,
    pub total_api_calls: u64,
    pub total_cost: Decimal,
}

/// Failures grouped for diagnosis.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    pub total_errors: u64,
    pub by_tool: HashMap<String, u64>,
    pub by_error_type: HashMap<String, u64>,
    /// Most recent failing records, newest first.
    pub recent: Vec<MetricRecord>,
}

/// Reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Day,
    Week,
    Month,
}

impl ReportPeriod {
    pub fn duration(&self) -> ChronoDuration {
        match self {
            Self::Day => ChronoDuration::days(1),
            Self::Week => ChronoDuration::weeks(1),
            Self::Month => ChronoDuration::days(30),
        }
    }
}

impl std::str::FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown report period: {other}")),
        }
    }
}

/// Aggregates over one reporting window.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub period: ReportPeriod,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub summary: SystemStats,
    /// Per-tool breakdown, busiest first.
    pub tools: Vec<ToolStats>,
    pub recommendations: Vec<String>,
}
