//! Result cache for tools that opt in through their cache policy.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use super::tool::ToolOutput;

struct Entry {
    output: ToolOutput,
    expires_at: Instant,
}

/// Successful outputs keyed by tool and parameters.
#[derive(Default)]
pub struct ResultCache {
    entries: DashMap<String, Entry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a call. Object keys serialize in sorted order, so equal
    /// parameter objects always produce the same key.
    pub fn key(tool_id: &str, params: &Value) -> String {
        format!("{tool_id}:{params}")
    }

    pub fn get(&self, key: &str, now: Instant) -> Option<ToolOutput> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > now {
            return Some(entry.output.clone());
        }
        drop(entry);
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }

    pub fn insert(&self, key: String, output: ToolOutput, ttl: Duration, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                output,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop expired entries. Returns the number removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
