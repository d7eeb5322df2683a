//! toolgate: admission control and execution for invocable tools.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod limiter;
pub mod metrics;
pub mod tools;
pub mod worker;
