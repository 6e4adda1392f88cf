use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use hearth_domain::chat::{ToolDefinition, ToolParameter};

/// A skill definition loaded from `skill.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub domain: String,
    /// Setting keys that must be non-empty for the skill to activate.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub actions: Vec<SkillAction>,

    /// Directory the manifest was loaded from (set by the loader).
    #[serde(skip)]
    pub dir: PathBuf,
}

/// One callable action declared by a skill.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillAction {
    pub name: String,
    pub description: String,
    /// Shell command executed in the skill directory. Parameters are
    /// passed as JSON in `HEARTH_ACTION_PARAMS`.
    pub command: String,
    /// Parameter name -> description. All skill parameters are strings.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl SkillManifest {
    /// The tool namespace for this skill's actions.
    pub fn plugin_name(&self) -> String {
        format!("skill_{}", self.id)
    }

    pub fn action(&self, name: &str) -> Option<&SkillAction> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Tool definitions for every action.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let plugin = self.plugin_name();
        self.actions
            .iter()
            .map(|action| ToolDefinition {
                name: action.name.clone(),
                plugin: plugin.clone(),
                description: action.description.clone(),
                parameters: action
                    .params
                    .iter()
                    .map(|(name, desc)| ToolParameter {
                        name: name.clone(),
                        ptype: "string".into(),
                        description: desc.clone(),
                        required: true,
                        is_path: false,
                    })
                    .collect(),
            })
            .collect()
    }
}
