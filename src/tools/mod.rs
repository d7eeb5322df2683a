//! Tool abstraction, registry, and result cache.

pub mod builtin;
pub mod cache;
pub mod registry;
pub mod tool;

pub use cache::ResultCache;
pub use registry::ToolRegistry;
pub use tool::*;
