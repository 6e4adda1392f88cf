//! Core runtime -- cancellation, per-session locks, context assembly,
//! the tool loop, background tasks, and the work registry.

pub mod cancel;
pub mod context;
pub mod formatter;
pub mod session_lock;
pub mod tasks;
pub mod truncate;
pub mod turn;
pub mod work;

pub use turn::{run_turn, TurnInput};

/// Truncate a string to at most `max` bytes at a char boundary,
/// appending `...` when anything was cut.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Build the system prompt from the configured persona tone.
pub fn build_system_prompt(tone: &str) -> String {
    let style = match tone {
        "professional" => "Keep a professional, precise register.",
        "casual" => "Keep a relaxed, conversational register.",
        "technical" => "Favor technical depth and exact terminology.",
        _ => "Balance friendliness with precision.",
    };
    format!(
        "You are Hearth, a personal assistant running on the user's own hardware. \
         Answer directly and keep responses grounded in tool results when tools \
         were used. {style} When you call tools, wait for their results before \
         concluding."
    )
}
