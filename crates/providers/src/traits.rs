use hearth_domain::chat::Message;
use hearth_domain::error::Result;
use hearth_domain::stream::{BoxStream, StreamChunk, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// System prompt, carried separately; adapters place it where their
    /// wire format expects it.
    pub system: Option<String>,
    /// Tool schemas, already rendered in the client's wire format.
    /// `None` suppresses tool calling for this round.
    pub tools: Option<Vec<Value>>,
}

/// A non-streaming chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    /// The model that actually answered (client tag).
    pub model: String,
    pub usage: Usage,
}

/// Which kind of deployment a client talks to. The runtime branches on
/// this variant, never on provider field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Local inference server, small context window.
    Local,
    /// Hosted paid API, large context window, native tool calling.
    Hosted,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements.
///
/// Adapters translate between the internal types and each provider's
/// HTTP wire format, and wrap failures into typed [`hearth_domain::Error`]
/// variants at this boundary.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Stable tag used on the wire and in persisted messages
    /// (`"local"` / `"hosted"`).
    fn name(&self) -> &str;

    fn kind(&self) -> ClientKind;

    /// Context window in tokens.
    fn context_window(&self) -> u32;

    /// Whether the provider emits structured tool_use blocks natively.
    fn supports_native_tools(&self) -> bool;

    /// Freshness-aware availability probe (results cached briefly).
    async fn is_available(&self) -> bool;

    /// Send a chat request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Send a chat request and return a lazy finite chunk sequence.
    /// The sequence ends at [`StreamChunk::Done`] or on cancellation.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>>;
}
