//! Tool registry and invoker.
//!
//! Aggregates tool definitions from native plugins and configured
//! skill actions, and executes calls behind one uniform contract:
//! policy hook -> rate limit -> path allow-list -> handler with a time
//! budget -> audit record. Every invocation yields a `ToolResult`,
//! success or not.

pub mod invoker;
pub mod plugin;
pub mod ratelimit;
pub mod registry;

pub use invoker::{ToolAuditSummary, ToolInvoker};
pub use plugin::{Plugin, PolicyDecision, SkillEngine};
pub use registry::ToolRegistry;
