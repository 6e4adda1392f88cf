//! Client selection and fallback.
//!
//! The router holds the configured clients, scores the latest user
//! message, and picks a client per turn: a forced override wins, a
//! score at or above the threshold prefers the hosted client, anything
//! else takes whichever client answers its availability probe. A
//! single fallback retry covers retriable failures.

use std::sync::Arc;

use hearth_domain::error::{Error, Result};

use crate::complexity::complexity_score;
use crate::traits::{ChatRequest, ChatResponse, ClientKind, ModelClient};

pub struct ModelRouter {
    clients: Vec<Arc<dyn ModelClient>>,
    threshold: u8,
}

impl ModelRouter {
    pub fn new(clients: Vec<Arc<dyn ModelClient>>, threshold: u8) -> Self {
        Self {
            clients,
            threshold: threshold.min(100),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn client_named(&self, name: &str) -> Option<Arc<dyn ModelClient>> {
        self.clients.iter().find(|c| c.name() == name).cloned()
    }

    async fn available_clients(&self) -> Vec<Arc<dyn ModelClient>> {
        let mut available = Vec::new();
        for client in &self.clients {
            if client.is_available().await {
                available.push(client.clone());
            }
        }
        available
    }

    /// Select a client for one turn.
    ///
    /// 1. A `force_model` override naming an available client wins.
    /// 2. Otherwise the latest user message is scored; at or above the
    ///    threshold the hosted client is preferred when available.
    /// 3. Any available client.
    /// 4. [`Error::NoModelAvailable`].
    pub async fn select(
        &self,
        latest_user_message: &str,
        force_model: Option<&str>,
    ) -> Result<Arc<dyn ModelClient>> {
        let available = self.available_clients().await;

        if let Some(forced) = force_model {
            if let Some(client) = available.iter().find(|c| c.name() == forced) {
                tracing::debug!(model = forced, "router honoring forced model");
                return Ok(client.clone());
            }
            tracing::warn!(model = forced, "forced model not available, routing normally");
        }

        if available.is_empty() {
            return Err(Error::NoModelAvailable);
        }

        let score = complexity_score(latest_user_message);
        if score >= self.threshold {
            if let Some(hosted) = available.iter().find(|c| c.kind() == ClientKind::Hosted) {
                tracing::debug!(score, threshold = self.threshold, "routing to hosted client");
                return Ok(hosted.clone());
            }
        }

        tracing::debug!(score, threshold = self.threshold, "routing to first available client");
        Ok(available[0].clone())
    }

    /// The other available client, for a single fallback retry.
    pub async fn fallback_for(&self, exclude: &str) -> Option<Arc<dyn ModelClient>> {
        for client in &self.clients {
            if client.name() != exclude && client.is_available().await {
                return Some(client.clone());
            }
        }
        None
    }

    /// Cheapest available client (local preferred), used for
    /// background summarization.
    pub async fn cheapest_available(&self) -> Option<Arc<dyn ModelClient>> {
        let available = self.available_clients().await;
        available
            .iter()
            .find(|c| c.kind() == ClientKind::Local)
            .or_else(|| available.first())
            .cloned()
    }

    /// Non-streaming chat with the one-shot fallback. Returns the tag
    /// of the client that actually answered.
    pub async fn chat(
        &self,
        req: &ChatRequest,
        latest_user_message: &str,
        force_model: Option<&str>,
    ) -> Result<(String, ChatResponse)> {
        let primary = self.select(latest_user_message, force_model).await?;

        match primary.chat(req).await {
            Ok(resp) => Ok((primary.name().to_string(), resp)),
            Err(e) if e.is_retriable() => {
                let Some(fallback) = self.fallback_for(primary.name()).await else {
                    return Err(e);
                };
                tracing::warn!(
                    from = primary.name(),
                    to = fallback.name(),
                    error = %e,
                    "primary client failed, retrying on fallback"
                );
                let resp = fallback.chat(req).await?;
                Ok((fallback.name().to_string(), resp))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::stream::{BoxStream, StreamChunk, Usage};

    /// Minimal scripted client for selection tests.
    struct FakeClient {
        name: &'static str,
        kind: ClientKind,
        available: bool,
        fail_chat: bool,
    }

    #[async_trait::async_trait]
    impl ModelClient for FakeClient {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> ClientKind {
            self.kind
        }
        fn context_window(&self) -> u32 {
            match self.kind {
                ClientKind::Local => 32_000,
                ClientKind::Hosted => 200_000,
            }
        }
        fn supports_native_tools(&self) -> bool {
            true
        }
        async fn is_available(&self) -> bool {
            self.available
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            if self.fail_chat {
                return Err(Error::Unavailable("scripted failure".into()));
            }
            Ok(ChatResponse {
                content: format!("answer from {}", self.name),
                model: self.name.to_string(),
                usage: Usage::default(),
            })
        }
        async fn chat_stream(
            &self,
            _req: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(
                StreamChunk::Done { usage: None },
            )])))
        }
    }

    fn local(available: bool) -> Arc<dyn ModelClient> {
        Arc::new(FakeClient {
            name: "local",
            kind: ClientKind::Local,
            available,
            fail_chat: false,
        })
    }

    fn hosted(available: bool) -> Arc<dyn ModelClient> {
        Arc::new(FakeClient {
            name: "hosted",
            kind: ClientKind::Hosted,
            available,
            fail_chat: false,
        })
    }

    #[tokio::test]
    async fn complex_request_routes_to_hosted() {
        let router = ModelRouter::new(vec![local(true), hosted(true)], 50);
        let client = router
            .select(
                "Analyze the tradeoffs between microservices and monoliths in detail, with examples.",
                None,
            )
            .await
            .unwrap();
        assert_eq!(client.name(), "hosted");
    }

    #[tokio::test]
    async fn greeting_routes_to_local() {
        let router = ModelRouter::new(vec![local(true), hosted(true)], 50);
        let client = router.select("hi", None).await.unwrap();
        assert_eq!(client.name(), "local");
    }

    #[tokio::test]
    async fn force_model_wins_when_available() {
        let router = ModelRouter::new(vec![local(true), hosted(true)], 50);
        let client = router.select("hi", Some("hosted")).await.unwrap();
        assert_eq!(client.name(), "hosted");
    }

    #[tokio::test]
    async fn force_model_ignored_when_unavailable() {
        let router = ModelRouter::new(vec![local(true), hosted(false)], 50);
        let client = router.select("hi", Some("hosted")).await.unwrap();
        assert_eq!(client.name(), "local");
    }

    #[tokio::test]
    async fn complex_without_hosted_falls_back_to_local() {
        let router = ModelRouter::new(vec![local(true), hosted(false)], 50);
        let client = router
            .select("Analyze and compare the architecture of these systems", None)
            .await
            .unwrap();
        assert_eq!(client.name(), "local");
    }

    #[tokio::test]
    async fn no_clients_available_errors() {
        let router = ModelRouter::new(vec![local(false), hosted(false)], 50);
        let result = router.select("hi", None).await;
        assert!(matches!(result, Err(Error::NoModelAvailable)));
    }

    #[tokio::test]
    async fn chat_falls_back_once_on_retriable_failure() {
        let failing_local: Arc<dyn ModelClient> = Arc::new(FakeClient {
            name: "local",
            kind: ClientKind::Local,
            available: true,
            fail_chat: true,
        });
        let router = ModelRouter::new(vec![failing_local, hosted(true)], 50);

        let (answered_by, resp) = router
            .chat(&ChatRequest::default(), "hi", None)
            .await
            .unwrap();
        assert_eq!(answered_by, "hosted");
        assert_eq!(resp.content, "answer from hosted");
    }

    #[tokio::test]
    async fn chat_surfaces_error_when_no_fallback() {
        let failing_local: Arc<dyn ModelClient> = Arc::new(FakeClient {
            name: "local",
            kind: ClientKind::Local,
            available: true,
            fail_chat: true,
        });
        let router = ModelRouter::new(vec![failing_local], 50);
        let err = router
            .chat(&ChatRequest::default(), "hi", None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "unavailable");
    }

    #[tokio::test]
    async fn cheapest_prefers_local() {
        let router = ModelRouter::new(vec![hosted(true), local(true)], 50);
        let client = router.cheapest_available().await.unwrap();
        assert_eq!(client.name(), "local");
    }
}
