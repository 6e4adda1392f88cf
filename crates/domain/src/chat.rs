use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Provider-neutral content blocks carried inside a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

impl MessageContent {
    /// Extract and join all text content.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool call as emitted by a model, resolved to its owning plugin.
///
/// On the wire the name is namespaced `plugin__tool`; [`ToolCall::parse`]
/// splits it back out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub plugin: String,
    pub name: String,
    pub parameters: Value,
}

impl ToolCall {
    /// Parse a namespaced wire name (`plugin__tool`) into a call.
    /// Names without a namespace resolve to the `unknown` plugin.
    pub fn parse(id: &str, full_name: &str, parameters: Value) -> Self {
        let (plugin, name) = match full_name.split_once("__") {
            Some((p, n)) => (p.to_string(), n.to_string()),
            None => ("unknown".to_string(), full_name.to_string()),
        };
        Self {
            id: id.to_string(),
            plugin,
            name,
            parameters,
        }
    }

    /// The namespaced wire name.
    pub fn full_name(&self) -> String {
        format!("{}__{}", self.plugin, self.name)
    }
}

/// The outcome of one tool invocation. Always produced, even on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// The text handed back to the model.
    pub fn content(&self) -> String {
        match (&self.output, &self.error) {
            (Some(out), _) => out.clone(),
            (None, Some(err)) => format!("Error: {err}"),
            (None, None) => "No result".to_string(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ptype: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Flagged parameters are checked against the plugin's path allow-list.
    #[serde(default)]
    pub is_path: bool,
}

fn default_true() -> bool {
    true
}

/// A tool definition aggregated by the registry.
///
/// Globally unique under the composite key `plugin__tool_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub plugin: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    pub fn full_name(&self) -> String {
        format!("{}__{}", self.plugin, self.name)
    }

    fn json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<Value> = Vec::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.ptype,
                    "description": p.description,
                }),
            );
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Native tool-calling schema (explicit JSON-schema `input_schema`).
    pub fn to_native_schema(&self) -> Value {
        serde_json::json!({
            "name": self.full_name(),
            "description": self.description,
            "input_schema": self.json_schema(),
        })
    }

    /// OpenAI-compatible function wrapper.
    pub fn to_openai_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.full_name(),
                "description": self.description,
                "parameters": self.json_schema(),
            }
        })
    }
}
