//! Built-in tools available in every deployment.

pub mod echo;
pub mod sleep;

use std::sync::Arc;

pub use echo::EchoTool;
pub use sleep::SleepTool;

use crate::tools::ToolRegistry;

/// Register every built-in tool, protecting their names from shadowing.
pub async fn register_builtins(registry: &ToolRegistry) {
    registry.register_builtin(Arc::new(EchoTool)).await;
    registry.register_builtin(Arc::new(SleepTool)).await;
}
