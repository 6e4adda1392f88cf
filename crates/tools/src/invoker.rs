use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use hearth_domain::chat::{ToolCall, ToolResult};

use crate::plugin::PolicyDecision;
use crate::ratelimit::SlidingWindowLimiter;
use crate::registry::ToolRegistry;

/// Error messages handed back to the model are bounded to this length.
const MAX_ERROR_CHARS: usize = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct AuditEntry {
    calls: u64,
    errors: u64,
    total_duration_ms: u64,
}

/// Per-tool call accounting, queryable as a summary.
#[derive(Debug, Clone, Serialize)]
pub struct ToolAuditSummary {
    pub tool: String,
    pub calls: u64,
    pub errors: u64,
    pub mean_duration_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invoker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes tool calls under the uniform contract: resolve -> policy ->
/// rate limit -> path allow-list -> handler with time budget -> audit.
///
/// Never fails outward: every internal failure becomes a
/// `success=false` result with a bounded error message.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    limiter: SlidingWindowLimiter,
    audit: Mutex<std::collections::HashMap<String, AuditEntry>>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            limiter: SlidingWindowLimiter::new(),
            audit: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a single tool call.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let result = self.execute_inner(call).await;
        self.record(call, started, result.success);
        result
    }

    async fn execute_inner(&self, call: &ToolCall) -> ToolResult {
        tracing::info!(plugin = %call.plugin, tool = %call.name, "executing tool");

        // Skill actions dispatch through the skill engine.
        if call.plugin.starts_with("skill_") {
            return self.execute_skill(call).await;
        }

        let Some(plugin) = self.registry.plugin(&call.plugin) else {
            return ToolResult::err(call, format!("Plugin '{}' not found", call.plugin));
        };

        // Policy hook.
        if let PolicyDecision::Deny(reason) = plugin.policy_check(&call.name, &call.parameters) {
            tracing::warn!(tool = %call.full_name(), reason = %reason, "tool call denied by policy");
            return ToolResult::err(call, format!("Tool call blocked by policy: {reason}"));
        }

        // Sliding-window rate limit.
        if let Err(retry_after) = self
            .limiter
            .check_and_record(&call.full_name(), plugin.rate_limit_per_minute())
        {
            return ToolResult::err(
                call,
                format!("Rate limit exceeded, retry in {retry_after}s"),
            );
        }

        // Path allow-list on flagged parameters.
        if let Some(roots) = plugin.allowed_paths() {
            if let Err(msg) = self.check_paths(call, &roots) {
                tracing::warn!(tool = %call.full_name(), error = %msg, "path outside allow-list");
                return ToolResult::err(call, msg);
            }
        }

        // Handler with a time budget.
        let budget = plugin.tool_timeout(&call.name);
        match tokio::time::timeout(budget, plugin.invoke(&call.name, &call.parameters)).await {
            Ok(Ok(output)) => ToolResult::ok(call, output),
            Ok(Err(e)) => ToolResult::err(call, bound_error(&e.to_string())),
            Err(_) => ToolResult::err(
                call,
                format!("Tool timed out after {}s", budget.as_secs()),
            ),
        }
    }

    async fn execute_skill(&self, call: &ToolCall) -> ToolResult {
        let Some(engine) = self.registry.skills() else {
            return ToolResult::err(call, "No skill engine configured");
        };

        if let Err(retry_after) = self
            .limiter
            .check_and_record(&call.full_name(), crate::plugin::DEFAULT_RATE_LIMIT)
        {
            return ToolResult::err(
                call,
                format!("Rate limit exceeded, retry in {retry_after}s"),
            );
        }

        let budget = crate::plugin::DEFAULT_TOOL_TIMEOUT;
        match tokio::time::timeout(
            budget,
            engine.execute_action(&call.plugin, &call.name, &call.parameters),
        )
        .await
        {
            Ok(Ok(output)) => ToolResult::ok(call, output),
            Ok(Err(e)) => ToolResult::err(call, bound_error(&e.to_string())),
            Err(_) => ToolResult::err(
                call,
                format!("Tool timed out after {}s", budget.as_secs()),
            ),
        }
    }

    /// Reject any path-flagged parameter resolving outside the roots.
    fn check_paths(&self, call: &ToolCall, roots: &[PathBuf]) -> Result<(), String> {
        let Some(def) = self.registry.definition(&call.full_name()) else {
            return Ok(());
        };
        for param in def.parameters.iter().filter(|p| p.is_path) {
            let Some(value) = call.parameters.get(&param.name).and_then(Value::as_str) else {
                continue;
            };
            if !path_allowed(value, roots) {
                return Err(format!("Path outside allowed directories: {value}"));
            }
        }
        Ok(())
    }

    fn record(&self, call: &ToolCall, started: Instant, success: bool) {
        let duration_ms = started.elapsed().as_millis() as u64;
        let mut audit = self.audit.lock();
        let entry = audit.entry(call.full_name()).or_default();
        entry.calls += 1;
        if !success {
            entry.errors += 1;
        }
        entry.total_duration_ms += duration_ms;
    }

    /// Per-tool audit summary, sorted by call count descending.
    pub fn audit_summary(&self) -> Vec<ToolAuditSummary> {
        let audit = self.audit.lock();
        let mut summaries: Vec<ToolAuditSummary> = audit
            .iter()
            .map(|(tool, e)| ToolAuditSummary {
                tool: tool.clone(),
                calls: e.calls,
                errors: e.errors,
                mean_duration_ms: if e.calls > 0 {
                    e.total_duration_ms / e.calls
                } else {
                    0
                },
            })
            .collect();
        summaries.sort_by(|a, b| b.calls.cmp(&a.calls));
        summaries
    }
}

/// Resolve `value` and require it to live under one of `roots`.
///
/// The deepest existing ancestor is canonicalized so symlinks can't
/// escape; the non-existing remainder must not contain `..`.
fn path_allowed(value: &str, roots: &[PathBuf]) -> bool {
    let path = Path::new(value);

    let resolved = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let Some(parent) = path.parent() else {
                return false;
            };
            let Some(file_name) = path.file_name() else {
                return false;
            };
            if path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return false;
            }
            match parent.canonicalize() {
                Ok(p) => p.join(file_name),
                Err(_) => return false,
            }
        }
    };

    roots.iter().any(|root| {
        root.canonicalize()
            .map(|r| resolved == r || resolved.starts_with(&r))
            .unwrap_or(false)
    })
}

fn bound_error(msg: &str) -> String {
    if msg.len() <= MAX_ERROR_CHARS {
        return msg.to_string();
    }
    let mut end = MAX_ERROR_CHARS;
    while !msg.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &msg[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use hearth_domain::chat::{ToolDefinition, ToolParameter};
    use hearth_domain::error::{Error, Result as DomainResult};
    use std::time::Duration;

    struct TestPlugin {
        deny: bool,
        limit: u32,
        roots: Option<Vec<PathBuf>>,
        slow: bool,
    }

    impl Default for TestPlugin {
        fn default() -> Self {
            Self {
                deny: false,
                limit: 60,
                roots: None,
                slow: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            "files"
        }
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "read".into(),
                plugin: "files".into(),
                description: "Read a file".into(),
                parameters: vec![ToolParameter {
                    name: "path".into(),
                    ptype: "string".into(),
                    description: "File path".into(),
                    required: true,
                    is_path: true,
                }],
            }]
        }
        async fn invoke(&self, tool: &str, params: &Value) -> DomainResult<String> {
            if self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            match tool {
                "read" => Ok(format!("contents of {}", params["path"].as_str().unwrap_or(""))),
                _ => Err(Error::Other(format!("no such tool: {tool}"))),
            }
        }
        fn policy_check(&self, _tool: &str, _params: &Value) -> PolicyDecision {
            if self.deny {
                PolicyDecision::Deny("blocked in config".into())
            } else {
                PolicyDecision::Allow
            }
        }
        fn rate_limit_per_minute(&self) -> u32 {
            self.limit
        }
        fn allowed_paths(&self) -> Option<Vec<PathBuf>> {
            self.roots.clone()
        }
        fn tool_timeout(&self, _tool: &str) -> Duration {
            Duration::from_millis(200)
        }
    }

    fn invoker_with(plugin: TestPlugin) -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register_plugin(Arc::new(plugin));
        ToolInvoker::new(Arc::new(registry))
    }

    fn call(params: Value) -> ToolCall {
        ToolCall::parse("tc_1", "files__read", params)
    }

    #[tokio::test]
    async fn successful_call_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();

        let invoker = invoker_with(TestPlugin {
            roots: Some(vec![dir.path().to_path_buf()]),
            ..Default::default()
        });
        let result = invoker
            .execute(&call(serde_json::json!({"path": path.to_str().unwrap()})))
            .await;
        assert!(result.success);
        assert!(result.output.unwrap().starts_with("contents of"));
    }

    #[tokio::test]
    async fn unknown_plugin_is_an_error_result() {
        let invoker = invoker_with(TestPlugin::default());
        let c = ToolCall::parse("tc", "ghost__boo", serde_json::json!({}));
        let result = invoker.execute(&c).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Plugin 'ghost' not found"));
    }

    #[tokio::test]
    async fn policy_denial_is_recorded_not_thrown() {
        let invoker = invoker_with(TestPlugin {
            deny: true,
            ..Default::default()
        });
        let result = invoker.execute(&call(serde_json::json!({"path": "/tmp/x"}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("blocked by policy"));
    }

    #[tokio::test]
    async fn rate_limit_kicks_in() {
        let invoker = invoker_with(TestPlugin {
            limit: 2,
            ..Default::default()
        });
        let params = serde_json::json!({"path": "/tmp/x"});
        invoker.execute(&call(params.clone())).await;
        invoker.execute(&call(params.clone())).await;
        let third = invoker.execute(&call(params)).await;
        assert!(!third.success);
        assert!(third.error.unwrap().contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn path_outside_allowlist_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = invoker_with(TestPlugin {
            roots: Some(vec![dir.path().to_path_buf()]),
            ..Default::default()
        });
        let result = invoker
            .execute(&call(serde_json::json!({"path": "/etc/passwd"})))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("outside allowed directories"));
    }

    #[tokio::test]
    async fn parent_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sneaky = format!("{}/../../etc/passwd", dir.path().display());
        let invoker = invoker_with(TestPlugin {
            roots: Some(vec![dir.path().to_path_buf()]),
            ..Default::default()
        });
        let result = invoker.execute(&call(serde_json::json!({"path": sneaky}))).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn handler_timeout_becomes_error_result() {
        let invoker = invoker_with(TestPlugin {
            slow: true,
            ..Default::default()
        });
        let result = invoker.execute(&call(serde_json::json!({"path": "/tmp/x"}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn audit_summary_counts_calls_and_errors() {
        let invoker = invoker_with(TestPlugin {
            deny: true,
            ..Default::default()
        });
        invoker.execute(&call(serde_json::json!({}))).await;
        invoker.execute(&call(serde_json::json!({}))).await;

        let summary = invoker.audit_summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].tool, "files__read");
        assert_eq!(summary[0].calls, 2);
        assert_eq!(summary[0].errors, 2);
    }

    #[test]
    fn bound_error_truncates() {
        let long = "e".repeat(2000);
        let bounded = bound_error(&long);
        assert!(bounded.len() <= MAX_ERROR_CHARS + 3);
        assert!(bounded.ends_with("..."));
    }
}
