//! Tool registry for managing available tools.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::tools::tool::{Tool, ToolDescriptor};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Names registered as built-in (protected from shadowing).
    builtin_names: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            builtin_names: RwLock::new(HashSet::new()),
        }
    }

    /// Register a tool. Rejects tools that try to shadow a built-in name.
    ///
    /// Returns whether the tool was registered.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.builtin_names.read().await.contains(&name) {
            tracing::warn!(
                tool = %name,
                "Rejected tool registration: would shadow a built-in tool"
            );
            return false;
        }
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
        true
    }

    /// Register a tool and protect its name from later shadowing.
    pub async fn register_builtin(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.builtin_names.write().await.insert(name.clone());
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered built-in tool: {}", name);
    }

    /// Unregister a tool. Built-ins stay registered.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if self.builtin_names.read().await.contains(name) {
            return None;
        }
        self.tools.write().await.remove(name)
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Check if a tool exists.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// List all tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered tools.
    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Catalog of every registered tool, sorted by name.
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let builtins = self.builtin_names.read().await;
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .read()
            .await
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
                timeout_ms: tool.execution_timeout().map(|t| t.as_millis() as u64),
                cached: tool.cache_policy().enabled,
                builtin: builtins.contains(tool.name()),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
