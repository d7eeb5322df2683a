//! Job records and their caller-facing views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::{JobStatus, Priority};

/// A deferred tool execution owned by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tool_id: String,
    pub parameters: Value,
    pub user_id: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempts made beyond the first.
    pub retries: u32,
    pub max_retries: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub error_type: Option<String>,
}

impl Job {
    pub fn new(
        tool_id: impl Into<String>,
        parameters: Value,
        user_id: impl Into<String>,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_id: tool_id.into(),
            parameters,
            user_id: user_id.into(),
            status: JobStatus::Pending,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retries: 0,
            max_retries,
            result: None,
            error: None,
            error_type: None,
        }
    }

    /// Move to `target`, stamping the matching timestamp.
    pub fn transition_to(&mut self, target: JobStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "Cannot transition job {} from {} to {}",
                self.id, self.status, target
            ));
        }
        let now = Utc::now();
        match target {
            JobStatus::Processing => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            JobStatus::Pending => {}
        }
        self.status = target;
        Ok(())
    }

    /// Wall-clock time between start and completion.
    pub fn processing_time_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        u64::try_from((completed - started).num_milliseconds()).ok()
    }

    /// View of this job as seen by `viewer`. Only the owner sees outcomes.
    pub fn view_for(&self, viewer: &str) -> JobView {
        let owner = self.user_id == viewer;
        JobView {
            id: self.id.clone(),
            tool_id: self.tool_id.clone(),
            user_id: self.user_id.clone(),
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            retries: self.retries,
            max_retries: self.max_retries,
            result: owner.then(|| self.result.clone()).flatten(),
            error: owner.then(|| self.error.clone()).flatten(),
            error_type: owner.then(|| self.error_type.clone()).flatten(),
        }
    }
}

/// Read view of a job. Outcome fields are omitted for non-owners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: String,
    pub tool_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}
