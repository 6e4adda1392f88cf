/// Shared error type used across all Hearth crates.
///
/// Provider adapters wrap HTTP failures into the typed variants at the
/// client boundary (status code -> variant), so the runtime matches on
/// variants rather than message text. [`Error::classify_message`] keeps
/// a substring fallback for errors that arrive as bare strings.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("request aborted")]
    Aborted,

    #[error("context window exceeded: {0}")]
    ContextOverflow(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("no model available")]
    NoModelAvailable,

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("store: {0}")]
    Store(String),

    #[error("tool call denied: {0}")]
    ToolDenied(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable category string carried on `error` wire events.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Aborted => "aborted",
            Error::ContextOverflow(_) => "context_overflow",
            Error::Timeout(_) => "timeout",
            Error::RateLimited(_) => "rate_limit",
            Error::Auth(_) => "auth",
            Error::Unavailable(_) | Error::NoModelAvailable => "unavailable",
            Error::Store(_) => "store",
            Error::ToolDenied(_) => "tool_denied",
            Error::Protocol(_) => "protocol",
            Error::Config(_) => "config",
            _ => "unknown",
        }
    }

    /// Whether a router-level fallback to the alternate client is warranted.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Unavailable(_))
    }

    /// Classify a bare error message into a typed variant.
    ///
    /// Fallback for errors that cross an untyped boundary (provider body
    /// text, handler panics). Rules match on lowercase substrings.
    pub fn classify_message(msg: &str) -> Error {
        let lower = msg.to_lowercase();

        if lower.contains("context") || lower.contains("too long") || lower.contains("maximum context")
        {
            return Error::ContextOverflow(msg.to_string());
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            return Error::Timeout(msg.to_string());
        }
        if (lower.contains("rate") && (lower.contains("limit") || lower.contains("429")))
            || lower.contains("too many")
        {
            return Error::RateLimited(msg.to_string());
        }
        if lower.contains("401")
            || lower.contains("api key")
            || lower.contains("invalid key")
            || lower.contains("unauthorized")
        {
            return Error::Auth(msg.to_string());
        }
        if (lower.contains("connect") && (lower.contains("refused") || lower.contains("error")))
            || lower.contains("unavailable")
        {
            return Error::Unavailable(msg.to_string());
        }

        Error::Other(msg.to_string())
    }
}
