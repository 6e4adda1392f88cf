//! Local model client.
//!
//! Talks to an Ollama-style inference server through its
//! OpenAI-compatible `/v1/chat/completions` endpoint. Small context
//! window (32k) -- the runtime truncates tool results accordingly.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use hearth_domain::chat::{ContentPart, Message, MessageContent, Role};
use hearth_domain::error::{Error, Result};
use hearth_domain::stream::{BoxStream, StreamChunk, Usage};

use crate::sse::{error_from_status, from_reqwest, sse_chunk_stream};
use crate::traits::{ChatRequest, ChatResponse, ClientKind, ModelClient};

const CONTEXT_WINDOW: u32 = 32_000;
const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const AVAILABILITY_TTL: Duration = Duration::from_secs(30);

/// Client for a local OpenAI-compatible inference server.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    /// Cached availability probe result.
    availability: Mutex<Option<(bool, Instant)>>,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            availability: Mutex::new(None),
        })
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &req.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.extend(req.messages.iter().map(msg_to_openai));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(tools) = &req.tools {
            body["tools"] = Value::Array(tools.clone());
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_openai(msg),
        Role::Tool => tool_result_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

/// Assistant messages carry tool calls as an OpenAI `tool_calls` array:
/// arguments as a JSON *string*, a synthetic id, and `type: "function"`.
fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    obj["content"] = Value::String(text_parts.join("\n"));
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        tokens_in: v.get("prompt_tokens")?.as_u64()? as u32,
        tokens_out: v.get("completion_tokens")?.as_u64()? as u32,
    })
}

fn parse_chat_response(body: &Value, model_tag: &str) -> Result<ChatResponse> {
    let message = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| Error::Provider {
            provider: "local".into(),
            message: "no choices in response".into(),
        })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(ChatResponse {
        content,
        model: model_tag.to_string(),
        usage: body.get("usage").and_then(parse_usage).unwrap_or_default(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reassembles OpenAI tool-call deltas into complete tool_use chunks.
///
/// Tool call fragments arrive keyed by index: the first fragment carries
/// id + name, later fragments append to the arguments string. Complete
/// calls are flushed when the finish chunk (or `[DONE]`) arrives.
#[derive(Default)]
struct StreamState {
    calls: BTreeMap<u64, (String, String, String)>,
    usage: Option<Usage>,
    finished: bool,
    done_emitted: bool,
}

impl StreamState {
    fn flush_calls(&mut self) -> Vec<Result<StreamChunk>> {
        let calls = std::mem::take(&mut self.calls);
        calls
            .into_values()
            .map(|(id, name, args)| {
                let input: Value = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&args).unwrap_or_else(|e| {
                        tracing::warn!(tool = %name, error = %e, "tool call arguments are not valid JSON, defaulting to empty object");
                        Value::Object(Default::default())
                    })
                };
                Ok(StreamChunk::ToolUse { id, name, input })
            })
            .collect()
    }

    fn done(&mut self) -> Vec<Result<StreamChunk>> {
        if self.done_emitted {
            return Vec::new();
        }
        self.done_emitted = true;
        let mut out = self.flush_calls();
        out.push(Ok(StreamChunk::Done {
            usage: self.usage.take(),
        }));
        out
    }
}

fn parse_sse_data(data: &str, state: &mut StreamState) -> Vec<Result<StreamChunk>> {
    if data.trim() == "[DONE]" {
        return state.done();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage, arrives last).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            state.usage = Some(usage);
            if state.finished {
                return state.done();
            }
        }
        return Vec::new();
    };

    if let Some(usage) = v.get("usage").and_then(parse_usage) {
        state.usage = Some(usage);
    }

    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tc_arr {
            let idx = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            let entry = state.calls.entry(idx).or_default();
            if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                entry.0 = id.to_string();
            }
            if let Some(name) = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
            {
                entry.1 = name.to_string();
            }
            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|a| a.as_str())
            {
                entry.2.push_str(args);
            }
        }
        return Vec::new();
    }

    if choice.get("finish_reason").and_then(|f| f.as_str()).is_some() {
        state.finished = true;
        // Hold the Done until the trailing usage chunk unless usage is
        // already known.
        if state.usage.is_some() {
            return state.done();
        }
        return Vec::new();
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return vec![Ok(StreamChunk::Text {
                delta: text.to_string(),
            })];
        }
    }

    Vec::new()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelClient for OllamaClient {
    fn name(&self) -> &str {
        "local"
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Local
    }

    fn context_window(&self) -> u32 {
        CONTEXT_WINDOW
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        if let Some((cached, at)) = *self.availability.lock() {
            if at.elapsed() < AVAILABILITY_TTL {
                return cached;
            }
        }

        let url = format!("{}/api/tags", self.base_url);
        let probe = self.client.get(&url).timeout(PROBE_TIMEOUT).send().await;
        let available = matches!(probe, Ok(resp) if resp.status().is_success());
        if !available {
            tracing::debug!(url = %url, "local model probe failed");
        }
        *self.availability.lock() = Some((available, Instant::now()));
        available
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(url = %url, "local chat request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(error_from_status("local", status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_chat_response(&json, self.name())
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(url = %url, "local stream request");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(error_from_status("local", status.as_u16(), &text));
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
            r#"{"choices":[{"delta":{"content":"hello"}}]}"#,
            &mut state,
        );
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], Ok(StreamChunk::Text { delta }) if delta == "hello"));
    }

    #[test]
    fn tool_call_deltas_assemble_into_one_chunk() {
        let mut state = StreamState::default();
        // First fragment: id + name.
        assert!(parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"web__web_fetch","arguments":""}}]}}]}"#,
            &mut state,
        )
        .is_empty());
        // Argument fragments.
        assert!(parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"url\":"}}]}}]}"#,
            &mut state,
        )
        .is_empty());
        assert!(parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"https://example.com\"}"}}]}}]}"#,
            &mut state,
        )
        .is_empty());

        // Finish + [DONE] flushes the assembled call then Done.
        assert!(parse_sse_data(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            &mut state,
        )
        .is_empty());
        let chunks = parse_sse_data("[DONE]", &mut state);
        assert_eq!(chunks.len(), 2);
        match &chunks[0] {
            Ok(StreamChunk::ToolUse { id, name, input }) => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "web__web_fetch");
                assert_eq!(input["url"], "https://example.com");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
        assert!(matches!(&chunks[1], Ok(StreamChunk::Done { .. })));
    }

    #[test]
    fn done_waits_for_trailing_usage_chunk() {
        let mut state = StreamState::default();
        assert!(parse_sse_data(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            &mut state,
        )
        .is_empty());

        let chunks = parse_sse_data(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":5,"total_tokens":17}}"#,
            &mut state,
        );
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            Ok(StreamChunk::Done { usage: Some(u) }) => {
                assert_eq!(u.tokens_in, 12);
                assert_eq!(u.tokens_out, 5);
            }
            other => panic!("expected Done with usage, got {other:?}"),
        }
    }

    #[test]
    fn done_emitted_once() {
        let mut state = StreamState::default();
        state.usage = Some(Usage { tokens_in: 1, tokens_out: 1 });
        let first = parse_sse_data(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            &mut state,
        );
        assert_eq!(first.len(), 1);
        assert!(parse_sse_data("[DONE]", &mut state).is_empty());
    }

    #[test]
    fn malformed_tool_arguments_default_to_empty_object() {
        let mut state = StreamState::default();
        state.calls.insert(0, ("c1".into(), "t".into(), "{not json".into()));
        let chunks = state.done();
        match &chunks[0] {
            Ok(StreamChunk::ToolUse { input, .. }) => {
                assert_eq!(input, &serde_json::json!({}));
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn assistant_message_serializes_tool_calls() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "checking".into() },
                ContentPart::ToolUse {
                    id: "call_1".into(),
                    name: "clock__clock_now".into(),
                    input: serde_json::json!({}),
                },
            ]),
        };
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["content"], "checking");
        assert_eq!(v["tool_calls"][0]["type"], "function");
        assert_eq!(v["tool_calls"][0]["function"]["name"], "clock__clock_now");
        // Arguments must be a stringified JSON payload.
        assert!(v["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: "call_1".into(),
                content: "3:04pm".into(),
            }]),
        };
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_1");
        assert_eq!(v["content"], "3:04pm");
    }
}
