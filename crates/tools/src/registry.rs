use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use hearth_domain::chat::ToolDefinition;

use crate::plugin::{Plugin, SkillEngine};

/// Name-indexed aggregation of native plugins and skill actions.
///
/// Definitions are globally unique under the composite `plugin__tool`
/// key; a later registration with a colliding name is dropped with a
/// warning.
pub struct ToolRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    skills: Option<Arc<dyn SkillEngine>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            skills: None,
        }
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            tracing::warn!(plugin = %name, "plugin re-registered, replacing previous");
        } else {
            tracing::info!(plugin = %name, "registered plugin");
        }
    }

    pub fn set_skill_engine(&mut self, engine: Arc<dyn SkillEngine>) {
        self.skills = Some(engine);
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn skills(&self) -> Option<Arc<dyn SkillEngine>> {
        self.skills.clone()
    }

    /// All tool definitions, plugins first, then skill actions.
    /// Duplicate composite names are dropped.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut seen: HashMap<String, ()> = HashMap::new();
        let mut defs = Vec::new();

        let mut plugin_names: Vec<&String> = self.plugins.keys().collect();
        plugin_names.sort();
        for name in plugin_names {
            for def in self.plugins[name].definitions() {
                let full = def.full_name();
                if seen.insert(full.clone(), ()).is_some() {
                    tracing::warn!(tool = %full, "duplicate tool definition dropped");
                    continue;
                }
                defs.push(def);
            }
        }

        if let Some(skills) = &self.skills {
            for def in skills.definitions() {
                let full = def.full_name();
                if seen.insert(full.clone(), ()).is_some() {
                    tracing::warn!(tool = %full, "duplicate skill action dropped");
                    continue;
                }
                defs.push(def);
            }
        }

        defs
    }

    /// Look up a single definition by its composite name.
    pub fn definition(&self, full_name: &str) -> Option<ToolDefinition> {
        self.definitions()
            .into_iter()
            .find(|d| d.full_name() == full_name)
    }

    /// Schemas for a native tool-calling provider.
    pub fn to_native_tools(&self) -> Vec<Value> {
        self.definitions()
            .iter()
            .map(ToolDefinition::to_native_schema)
            .collect()
    }

    /// Schemas in the OpenAI-compatible function wrapper.
    pub fn to_openai_tools(&self) -> Vec<Value> {
        self.definitions()
            .iter()
            .map(ToolDefinition::to_openai_schema)
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::chat::ToolParameter;
    use hearth_domain::error::Result;

    struct EchoPlugin;

    #[async_trait::async_trait]
    impl Plugin for EchoPlugin {
        fn name(&self) -> &str {
            "echo"
        }
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "say".into(),
                plugin: "echo".into(),
                description: "Echo back".into(),
                parameters: vec![ToolParameter {
                    name: "text".into(),
                    ptype: "string".into(),
                    description: "Text".into(),
                    required: true,
                    is_path: false,
                }],
            }]
        }
        async fn invoke(&self, _tool: &str, params: &Value) -> Result<String> {
            Ok(params["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct FakeSkills;

    #[async_trait::async_trait]
    impl SkillEngine for FakeSkills {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "convert".into(),
                plugin: "skill_currency".into(),
                description: "Convert currency".into(),
                parameters: vec![],
            }]
        }
        async fn execute_action(
            &self,
            _plugin: &str,
            _action: &str,
            _params: &Value,
        ) -> Result<String> {
            Ok("42".into())
        }
    }

    #[test]
    fn definitions_merge_plugins_and_skills() {
        let mut registry = ToolRegistry::new();
        registry.register_plugin(Arc::new(EchoPlugin));
        registry.set_skill_engine(Arc::new(FakeSkills));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().any(|d| d.full_name() == "echo__say"));
        assert!(defs.iter().any(|d| d.full_name() == "skill_currency__convert"));
    }

    #[test]
    fn wire_schemas_cover_all_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register_plugin(Arc::new(EchoPlugin));

        let native = registry.to_native_tools();
        assert_eq!(native.len(), 1);
        assert_eq!(native[0]["name"], "echo__say");
        assert!(native[0]["input_schema"].is_object());

        let openai = registry.to_openai_tools();
        assert_eq!(openai[0]["type"], "function");
        assert_eq!(openai[0]["function"]["name"], "echo__say");
    }

    #[test]
    fn definition_lookup_by_full_name() {
        let mut registry = ToolRegistry::new();
        registry.register_plugin(Arc::new(EchoPlugin));
        assert!(registry.definition("echo__say").is_some());
        assert!(registry.definition("echo__missing").is_none());
    }
}
