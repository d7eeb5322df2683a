//! Read-only HTTP surface: health, tool catalog, and metrics.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::Gateway;
use crate::metrics::{MetricRecord, ReportPeriod};

/// Default and maximum for `/api/metrics/top?limit=`.
const DEFAULT_TOP_LIMIT: usize = 10;
const MAX_TOP_LIMIT: usize = 100;

/// Build the Axum router over a shared gateway.
pub fn routes(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/metrics/top", get(top_tools))
        .route("/api/metrics/report", get(report))
        .route("/api/metrics/errors", get(errors))
        .with_state(gateway)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.health().await)
}

// ── Catalog ─────────────────────────────────────────────────────────────

async fn list_tools(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.registry().descriptors().await)
}

// ── Metrics ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TopParams {
    limit: Option<usize>,
}

async fn top_tools(
    State(gateway): State<Arc<Gateway>>,
    Query(params): Query<TopParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TOP_LIMIT)
        .min(MAX_TOP_LIMIT);
    Json(gateway.metrics().get_top_tools(limit))
}

#[derive(Deserialize)]
struct ReportParams {
    period: Option<String>,
}

async fn report(
    State(gateway): State<Arc<Gateway>>,
    Query(params): Query<ReportParams>,
) -> impl IntoResponse {
    let period = match params.period.as_deref().unwrap_or("day").parse::<ReportPeriod>() {
        Ok(period) => period,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e })),
            )
                .into_response();
        }
    };
    Json(gateway.metrics().generate_report(period).await).into_response()
}

#[derive(Deserialize)]
struct ErrorParams {
    recent: Option<usize>,
}

async fn errors(
    State(gateway): State<Arc<Gateway>>,
    Query(params): Query<ErrorParams>,
) -> impl IntoResponse {
    let metrics = gateway.metrics();
    let recent = params
        .recent
        .unwrap_or(metrics.config().recent_errors)
        .min(MAX_TOP_LIMIT);
    let analysis = metrics.get_error_analysis(recent).await;
    Json(PublicErrors {
        total_errors: analysis.total_errors,
        by_tool: analysis.by_tool,
        by_error_type: analysis.by_error_type,
        recent: analysis.recent.iter().map(RecentFailure::from).collect(),
    })
}

/// Error analysis without caller identities.
#[derive(Serialize)]
struct PublicErrors {
    total_errors: u64,
    by_tool: HashMap<String, u64>,
    by_error_type: HashMap<String, u64>,
    recent: Vec<RecentFailure>,
}

#[derive(Serialize)]
struct RecentFailure {
    tool_id: String,
    timestamp: DateTime<Utc>,
    execution_time_ms: u64,
    error_type: Option<String>,
}

impl From<&MetricRecord> for RecentFailure {
    fn from(record: &MetricRecord) -> Self {
        Self {
            tool_id: record.tool_id.clone(),
            timestamp: record.timestamp,
            execution_time_ms: record.execution_time_ms,
            error_type: record.error_type.clone(),
        }
    }
}
