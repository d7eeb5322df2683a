//! Execution metrics.
//!
//! - `record`: per-execution records and the aggregates built from them
//! - `collector`: sharded running totals, reports, retention
//! - `alerts`: hook invoked on every failed execution

pub mod alerts;
pub mod collector;
pub mod record;

pub use alerts::{AlertSink, LogAlertSink};
pub use collector::MetricsCollector;
pub use record::{ErrorAnalysis, MetricRecord, Report, ReportPeriod, SystemStats, ToolStats};
