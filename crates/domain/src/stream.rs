use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One element of a streaming model response.
///
/// Every provider adapter converts its wire format into this uniform
/// protocol; the runtime never sees provider-specific field names.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamChunk {
    /// A text delta.
    #[serde(rename = "text")]
    Text { delta: String },

    /// A complete tool-use declaration.
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// End of the stream. Carries usage when the provider reports it.
    #[serde(rename = "done")]
    Done { usage: Option<Usage> },
}

/// Token usage for one model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
    }
}
