//! Per-session cancellation tokens.
//!
//! Each running turn gets a `CancelToken`. Calling `cancel()` signals
//! the loop to stop at its next suspension point. Cancellation is
//! cooperative, idempotent, and terminal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token checked by the runtime loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancel token per session.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new token for a session's turn.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a session. Returns true if a token
    /// was found.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token when a turn completes.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    /// Whether a session has a turn in flight.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}
