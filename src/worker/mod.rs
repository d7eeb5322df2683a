//! Worker system: queued tool execution.
//!
//! Core components:
//! - `state`: Job status machine (Pending → Processing → Completed/Failed)
//! - `job`: Job records and owner-aware views
//! - `queue`: Priority queue, admission checks, lifecycle
//! - `worker`: Pool slot that runs a job's attempts
//! - `retry`: Exponential backoff between attempts
//! - `watchdog`: Fails jobs whose worker never came back
//! - `hooks`: Persistence and notification on completion

pub mod hooks;
pub mod job;
pub mod queue;
pub mod retry;
pub mod state;
pub mod watchdog;
pub mod worker;

pub use hooks::{JobHooks, JobNotifier, JobPersistence, NoopNotifier, NoopPersistence, WebhookNotifier};
pub use job::{Job, JobView};
pub use queue::{JobQueue, QueueStats};
pub use retry::RetryPolicy;
pub use state::{JobStatus, Priority};
pub use watchdog::WATCHDOG_ERROR_TYPE;
pub use worker::Worker;
