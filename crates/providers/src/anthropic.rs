//! Hosted model client.
//!
//! Implements the Anthropic Messages API: system prompt as a top-level
//! field, tool use via content blocks, streaming via typed SSE events
//! with tool input JSON accumulated across deltas.

use std::collections::HashMap;

use serde_json::Value;

use hearth_domain::chat::{ContentPart, Message, MessageContent, Role};
use hearth_domain::error::{Error, Result};
use hearth_domain::stream::{BoxStream, StreamChunk, Usage};

use crate::sse::{error_from_status, from_reqwest, sse_chunk_stream};
use crate::traits::{ChatRequest, ChatResponse, ClientKind, ModelClient};

const API_VERSION: &str = "2023-06-01";
const CONTEXT_WINDOW: u32 = 200_000;
const MAX_TOKENS: u32 = 4096;
const CHAT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Client for the hosted Anthropic Messages API.
pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        Self::with_base_url("https://api.anthropic.com", api_key, model)
    }

    pub fn with_base_url(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let api_messages: Vec<Value> = req
            .messages
            .iter()
            .map(|msg| match msg.role {
                Role::Assistant => assistant_to_anthropic(msg),
                // Tool results travel as user messages with tool_result blocks.
                Role::Tool => tool_result_to_anthropic(msg),
                _ => user_to_anthropic(msg),
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": api_messages,
            "max_tokens": MAX_TOKENS,
            "stream": stream,
        });
        if let Some(system) = &req.system {
            body["system"] = Value::String(system.clone());
        }
        if let Some(tools) = &req.tools {
            body["tools"] = Value::Array(tools.clone());
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "user", "content": t}),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                    } => serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                    }),
                    ContentPart::ToolUse { id, name, input } => serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    }),
                })
                .collect();
            serde_json::json!({"role": "user", "content": content})
        }
    }
}

fn assistant_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": "assistant",
            "content": [{"type": "text", "text": t}],
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => {
                        Some(serde_json::json!({"type": "text", "text": text}))
                    }
                    ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({"role": "assistant", "content": content})
        }
    }
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    serde_json::json!({"role": "user", "content": content})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        tokens_in: v.get("input_tokens")?.as_u64()? as u32,
        tokens_out: v.get("output_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as u32,
    })
}

fn parse_chat_response(body: &Value, model_tag: &str) -> Result<ChatResponse> {
    let empty = Vec::new();
    let content_arr = body
        .get("content")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let text: String = content_arr
        .iter()
        .filter_map(|block| {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                block.get("text").and_then(|t| t.as_str())
            } else {
                None
            }
        })
        .collect();

    Ok(ChatResponse {
        content: text,
        model: model_tag.to_string(),
        usage: body.get("usage").and_then(parse_usage).unwrap_or_default(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembles tool_use content blocks from streamed deltas.
/// Block index -> (call id, tool name, accumulated input JSON).
#[derive(Default)]
struct StreamState {
    active: HashMap<u64, (String, String, String)>,
    usage: Option<Usage>,
    done_emitted: bool,
}

fn parse_sse_data(data: &str, state: &mut StreamState) -> Vec<Result<StreamChunk>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut out = Vec::new();
    match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_usage);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let id = block.get("id").and_then(|i| i.as_str()).unwrap_or("");
                    let name = block.get("name").and_then(|n| n.as_str()).unwrap_or("");
                    state
                        .active
                        .insert(idx, (id.to_string(), name.to_string(), String::new()));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                out.push(Ok(StreamChunk::Text {
                                    delta: text.to_string(),
                                }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) =
                            delta.get("partial_json").and_then(|p| p.as_str())
                        {
                            if let Some(entry) = state.active.get_mut(&idx) {
                                entry.2.push_str(partial);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some((id, name, args)) = state.active.remove(&idx) {
                let input: Value = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()))
                };
                out.push(Ok(StreamChunk::ToolUse { id, name, input }));
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|t| t.as_u64())
            {
                if let Some(u) = &mut state.usage {
                    u.tokens_out = output as u32;
                } else {
                    state.usage = Some(Usage {
                        tokens_in: 0,
                        tokens_out: output as u32,
                    });
                }
            }
            if v.get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|s| s.as_str())
                .is_some()
                && !state.done_emitted
            {
                state.done_emitted = true;
                out.push(Ok(StreamChunk::Done {
                    usage: state.usage.take(),
                }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                out.push(Ok(StreamChunk::Done {
                    usage: state.usage.take(),
                }));
            }
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown stream error");
            out.push(Err(Error::classify_message(msg)));
        }

        // ping and unknown event types.
        _ => {}
    }

    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelClient for AnthropicClient {
    fn name(&self) -> &str {
        "hosted"
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Hosted
    }

    fn context_window(&self) -> u32 {
        CONTEXT_WINDOW
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(url = %url, "hosted chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(error_from_status("hosted", status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_chat_response(&json, self.name())
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(url = %url, "hosted stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(error_from_status("hosted", status.as_u16(), &text));
        }

        let mut state = StreamState::default();
        Ok(sse_chunk_stream(resp, move |data| {
            parse_sse_data(data, &mut state)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_parses() {
        let mut state = StreamState::default();
        let chunks = parse_sse_data(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
            &mut state,
        );
        assert!(matches!(&chunks[0], Ok(StreamChunk::Text { delta }) if delta == "hi"));
    }

    #[test]
    fn tool_use_block_assembles_across_deltas() {
        let mut state = StreamState::default();
        assert!(parse_sse_data(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"web__web_fetch"}}"#,
            &mut state,
        )
        .is_empty());
        assert!(parse_sse_data(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"url\":\"https:"}}"#,
            &mut state,
        )
        .is_empty());
        assert!(parse_sse_data(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"//example.com\"}"}}"#,
            &mut state,
        )
        .is_empty());

        let chunks = parse_sse_data(r#"{"type":"content_block_stop","index":1}"#, &mut state);
        match &chunks[0] {
            Ok(StreamChunk::ToolUse { id, name, input }) => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "web__web_fetch");
                assert_eq!(input["url"], "https://example.com");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn message_delta_carries_usage_into_done() {
        let mut state = StreamState::default();
        parse_sse_data(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":30,"output_tokens":0}}}"#,
            &mut state,
        );
        let chunks = parse_sse_data(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":9}}"#,
            &mut state,
        );
        match &chunks[0] {
            Ok(StreamChunk::Done { usage: Some(u) }) => {
                assert_eq!(u.tokens_in, 30);
                assert_eq!(u.tokens_out, 9);
            }
            other => panic!("expected Done with usage, got {other:?}"),
        }
    }

    #[test]
    fn message_stop_does_not_duplicate_done() {
        let mut state = StreamState::default();
        parse_sse_data(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
            &mut state,
        );
        assert!(parse_sse_data(r#"{"type":"message_stop"}"#, &mut state).is_empty());
    }

    #[test]
    fn stream_error_is_classified() {
        let mut state = StreamState::default();
        let chunks = parse_sse_data(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"server unavailable"}}"#,
            &mut state,
        );
        match &chunks[0] {
            Err(e) => assert_eq!(e.category(), "unavailable"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn tool_results_serialize_as_user_tool_result_blocks() {
        let msg = Message {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: "page body".into(),
            }]),
        };
        let v = tool_result_to_anthropic(&msg);
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"][0]["type"], "tool_result");
        assert_eq!(v["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn assistant_tool_use_serializes_as_blocks() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "on it".into() },
                ContentPart::ToolUse {
                    id: "toolu_1".into(),
                    name: "clock__clock_now".into(),
                    input: serde_json::json!({}),
                },
            ]),
        };
        let v = assistant_to_anthropic(&msg);
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["type"], "tool_use");
        assert_eq!(v["content"][1]["name"], "clock__clock_now");
    }
}
