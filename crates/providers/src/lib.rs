//! Model client adapters and the router that selects between them.

pub mod anthropic;
pub mod complexity;
pub mod ollama;
pub mod router;
mod sse;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use router::ModelRouter;
pub use traits::{ChatRequest, ChatResponse, ClientKind, ModelClient};
