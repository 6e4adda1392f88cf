use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use hearth_domain::chat::ToolDefinition;
use hearth_domain::error::Result;

/// Default handler time budget.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-tool sliding-window rate limit (calls per minute).
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Outcome of a plugin's policy hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

/// A native plugin: a named bundle of tools with shared policy,
/// rate-limit, and path-sandbox settings.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Namespace prefix for this plugin's tools.
    fn name(&self) -> &str;

    /// Tool definitions this plugin exports.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one of this plugin's tools.
    async fn invoke(&self, tool: &str, params: &Value) -> Result<String>;

    /// Policy hook consulted before every call. May refuse.
    fn policy_check(&self, _tool: &str, _params: &Value) -> PolicyDecision {
        PolicyDecision::Allow
    }

    /// Calls per minute allowed per tool.
    fn rate_limit_per_minute(&self) -> u32 {
        DEFAULT_RATE_LIMIT
    }

    /// Directories that path-flagged parameters must resolve into.
    /// `None` means this plugin takes no path parameters.
    fn allowed_paths(&self) -> Option<Vec<PathBuf>> {
        None
    }

    /// Handler time budget, overridable per tool.
    fn tool_timeout(&self, _tool: &str) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}

/// Dispatch surface for configured skill actions.
///
/// Skill actions share the invoker with native plugins; their plugin
/// namespace is `skill_<id>`, which is the dispatch tag.
#[async_trait::async_trait]
pub trait SkillEngine: Send + Sync {
    /// Definitions for every configured skill action.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one action. `plugin` is the `skill_<id>` namespace.
    async fn execute_action(&self, plugin: &str, action: &str, params: &Value) -> Result<String>;

    /// The skill ids that successfully executed, for usage accounting.
    fn skill_id_of(&self, plugin: &str) -> Option<String> {
        plugin.strip_prefix("skill_").map(String::from)
    }
}
