//! Follow-up message formatting for tool rounds.
//!
//! Three dialects, picked once at the start of a turn from the
//! configured tool-calling mode and the client kind. Legacy mode also
//! owns the text-tag tool-call parser.

use serde_json::Value;

use hearth_domain::chat::{
    ContentPart, Message, MessageContent, Role, ToolCall, ToolResult,
};
use hearth_providers::ClientKind;

/// How tool calls and results travel between rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDialect {
    /// Hosted native: content blocks (tool_use / tool_result).
    AnthropicBlocks,
    /// Local native: `tool_calls` array + tool-role messages.
    OpenAiToolCalls,
    /// Text-based `<tool_call>` tags, results folded into a user turn.
    LegacyText,
}

impl ToolDialect {
    /// Pick the dialect for one turn.
    pub fn pick(tool_calling_mode: &str, kind: ClientKind) -> Self {
        if tool_calling_mode != "native" {
            return ToolDialect::LegacyText;
        }
        match kind {
            ClientKind::Hosted => ToolDialect::AnthropicBlocks,
            ClientKind::Local => ToolDialect::OpenAiToolCalls,
        }
    }

    /// Whether tool schemas are sent to the provider at all.
    pub fn uses_native_tools(&self) -> bool {
        !matches!(self, ToolDialect::LegacyText)
    }
}

/// Build the messages appended after a round of tool execution.
pub fn build_followup(
    dialect: ToolDialect,
    text: &str,
    calls: &[ToolCall],
    results: &[ToolResult],
    round: u32,
) -> Vec<Message> {
    match dialect {
        ToolDialect::AnthropicBlocks => format_blocks(text, calls, results),
        ToolDialect::OpenAiToolCalls => format_tool_messages(text, calls, results),
        ToolDialect::LegacyText => format_legacy(text, results, round),
    }
}

/// Assistant message with text + tool_use parts, then one message per
/// result. The hosted adapter renders tool-role messages as user
/// tool_result blocks; the local adapter renders them as tool-role
/// wire messages -- so both native dialects share this assistant shape.
fn assistant_with_calls(text: &str, calls: &[ToolCall]) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });
    }
    for call in calls {
        parts.push(ContentPart::ToolUse {
            id: call.id.clone(),
            name: call.full_name(),
            input: call.parameters.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
    }
}

fn format_blocks(text: &str, calls: &[ToolCall], results: &[ToolResult]) -> Vec<Message> {
    let result_parts: Vec<ContentPart> = results
        .iter()
        .map(|r| ContentPart::ToolResult {
            tool_use_id: r.tool_call_id.clone(),
            content: r.content(),
        })
        .collect();

    vec![
        assistant_with_calls(text, calls),
        Message {
            role: Role::User,
            content: MessageContent::Parts(result_parts),
        },
    ]
}

fn format_tool_messages(text: &str, calls: &[ToolCall], results: &[ToolResult]) -> Vec<Message> {
    let mut messages = vec![assistant_with_calls(text, calls)];
    for (i, result) in results.iter().enumerate() {
        // A missing call id falls back to the matching call's, then to
        // a synthetic one.
        let mut id = result.tool_call_id.clone();
        if id.is_empty() {
            id = calls
                .get(i)
                .map(|c| c.id.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| format!("call_{i}"));
        }
        messages.push(Message {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: id,
                content: result.content(),
            }]),
        });
    }
    messages
}

fn format_legacy(text: &str, results: &[ToolResult], round: u32) -> Vec<Message> {
    let feedback: Vec<String> = results
        .iter()
        .map(|r| {
            if r.success {
                format!("**{}** returned:\n{}", r.tool_name, r.content())
            } else {
                format!(
                    "**{}** error: {}",
                    r.tool_name,
                    r.error.as_deref().unwrap_or("unknown")
                )
            }
        })
        .collect();

    vec![
        Message::assistant(text),
        Message::user(format!(
            "[Tool Results -- Round {round}]\n\n{}\n\nUse these results to continue. \
             If you need more tools, call them. Otherwise give your final answer.",
            feedback.join("\n\n")
        )),
    ]
}

/// Parse `<tool_call>{json}</tool_call>` tags out of a legacy-mode
/// response. The payload is `{"tool": "plugin__name", "parameters": {}}`.
pub fn parse_legacy_tool_calls(text: &str) -> Vec<ToolCall> {
    let re = legacy_tag_re();
    re.captures_iter(text)
        .enumerate()
        .filter_map(|(i, cap)| {
            let payload: Value = serde_json::from_str(cap.get(1)?.as_str().trim()).ok()?;
            let full_name = payload.get("tool")?.as_str()?.to_string();
            let params = payload
                .get("parameters")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            Some(ToolCall::parse(&format!("legacy_{i}"), &full_name, params))
        })
        .collect()
}

fn legacy_tag_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?s)<tool_call>\s*(\{.*?\})\s*</tool_call>").expect("legacy tag regex")
    })
}
