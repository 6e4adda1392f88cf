//! Conversation context builder.
//!
//! Assembles the message list sent to the model: a rolling summary of
//! older conversation (when one exists), the most recent messages, and
//! the new user message. Also owns token estimation, the 80 % window
//! guard, and the summary-refresh condition.

use std::sync::Arc;

use hearth_domain::chat::{Message, MessageContent, Role};
use hearth_providers::ModelClient;
use hearth_store::{Store, StoreError, SummaryRow};

/// Recent messages kept verbatim in the context window.
pub const RECENT_WINDOW: u32 = 20;
/// Message count at which summarization starts.
pub const SUMMARY_THRESHOLD: u32 = 30;
/// New messages beyond the last summary before it is regenerated.
pub const SUMMARY_REFRESH_GAP: u32 = 20;

const SUMMARY_MARKER: &str =
    "[Conversation summary of earlier messages -- use as background context]";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token estimation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rough token estimate: ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() / 4 + 1) as u32
}

/// Sum token estimates across messages, +4 per message for role
/// overhead.
pub fn estimate_messages_tokens(messages: &[Message]) -> u32 {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content.extract_all_text()) + 4)
        .sum()
}

/// True when messages + system fit under 80 % of the window, leaving
/// headroom for the response. Logs a warning when they don't -- the
/// turn proceeds regardless; in-loop overflow is handled by tool
/// result truncation.
pub fn check_context_fits(messages: &[Message], system: &str, window: u32) -> bool {
    let total = estimate_tokens(system) + estimate_messages_tokens(messages);
    let fits = (total as f64) < (window as f64) * 0.8;
    if !fits {
        tracing::warn!(
            estimated_tokens = total,
            window,
            "context estimate exceeds 80% of the model window"
        );
    }
    fits
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the message list for one turn: [summary pair?] + recent
/// window + new user message.
pub fn build_context(
    store: &Store,
    conv_id: &str,
    new_user_message: &str,
) -> Result<Vec<Message>, StoreError> {
    let total = store.count_messages(conv_id)?;
    let history = store.get_recent_messages(conv_id, RECENT_WINDOW)?;

    let mut messages = Vec::new();

    if total > RECENT_WINDOW {
        if let Some(summary) = store.get_summary(conv_id)? {
            messages.push(Message::user(SUMMARY_MARKER));
            messages.push(Message::assistant(summary.text));
        }
    }

    for row in history {
        let Some(role) = Role::parse(&row.role) else {
            continue;
        };
        messages.push(Message {
            role,
            content: MessageContent::Text(row.content),
        });
    }

    if !new_user_message.is_empty() {
        messages.push(Message::user(new_user_message));
    }

    Ok(messages)
}

/// The summary refresh condition: enough messages overall, and either
/// no summary yet or a large enough gap since the last one.
pub fn needs_summary_refresh(total: u32, summary: Option<&SummaryRow>) -> bool {
    if total < SUMMARY_THRESHOLD {
        return false;
    }
    match summary {
        None => true,
        Some(s) => {
            total
                .saturating_sub(s.messages_covered)
                .saturating_sub(RECENT_WINDOW)
                >= SUMMARY_REFRESH_GAP
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summary generation (background task body)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Summarize everything older than the recent window and persist the
/// result. Runs on the task queue; never blocks a turn.
pub async fn generate_summary(
    store: &Store,
    client: Arc<dyn ModelClient>,
    conv_id: &str,
) -> Result<(), String> {
    let total = store.count_messages(conv_id).map_err(|e| e.to_string())?;
    let older_count = total.saturating_sub(RECENT_WINDOW);
    if older_count <= 5 {
        return Ok(());
    }

    let all = store.get_all_messages(conv_id).map_err(|e| e.to_string())?;
    let older = &all[..(older_count as usize).min(all.len())];
    if older.is_empty() {
        return Ok(());
    }

    let mut parts = Vec::with_capacity(older.len());
    for row in older {
        let mut content = row.content.clone();
        if content.len() > 500 {
            let mut end = 500;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            content.truncate(end);
            content.push_str("...");
        }
        let label = if row.role == "user" { "USER" } else { "ASSISTANT" };
        parts.push(format!("{label}: {content}"));
    }
    let mut conversation_text = parts.join("\n");
    if conversation_text.len() > 8_000 {
        let mut end = 8_000;
        while !conversation_text.is_char_boundary(end) {
            end -= 1;
        }
        conversation_text.truncate(end);
        conversation_text.push_str("\n...(truncated)");
    }

    let prompt = format!(
        "Summarise the following conversation history concisely. Capture the key \
         topics discussed, any decisions made, important facts mentioned, and the \
         current state of each topic. Use bullet points. Keep it under 300 words.\n\n\
         CONVERSATION:\n{conversation_text}"
    );

    let req = hearth_providers::ChatRequest {
        messages: vec![Message::user(prompt)],
        system: Some(
            "You are a precise summariser. Extract key facts, topics, and decisions only. \
             Be concise."
                .to_string(),
        ),
        tools: None,
    };

    let resp = client.chat(&req).await.map_err(|e| e.to_string())?;
    if resp.content.len() > 20 {
        store
            .save_summary(conv_id, &resp.content, older_count)
            .map_err(|e| e.to_string())?;
        tracing::info!(
            conv_id,
            covered = older_count,
            chars = resp.content.len(),
            "generated conversation summary"
        );
    } else {
        tracing::warn!(conv_id, "summary generation returned an empty result");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_basics() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 101);
    }

    #[test]
    fn message_tokens_include_role_overhead() {
        let messages = vec![Message::user("abcd"), Message::assistant("efgh")];
        // (1+1) + 4 + (1+1) + 4... estimate("abcd") = 2, so 2+4+2+4 = 12.
        assert_eq!(estimate_messages_tokens(&messages), 12);
    }

    #[test]
    fn context_guard_at_80_percent() {
        // 32k window: limit is 25,600 tokens.
        let big = "x".repeat(150_000); // ~37,500 tokens
        assert!(!check_context_fits(&[Message::user(big)], "", 32_000));
        assert!(check_context_fits(&[Message::user("short")], "sys", 32_000));
    }

    #[test]
    fn short_conversation_has_no_summary_pair() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation("c").unwrap();
        for i in 0..5 {
            store
                .append_message(&conv.id, "user", &format!("m{i}"), None, 0, 0)
                .unwrap();
        }

        let messages = build_context(&store, &conv.id, "new question").unwrap();
        // 5 history + 1 new.
        assert_eq!(messages.len(), 6);
        assert_eq!(messages.last().unwrap().content.extract_all_text(), "new question");
    }

    #[test]
    fn long_conversation_prepends_summary_pair() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation("c").unwrap();
        for i in 0..25 {
            store
                .append_message(&conv.id, "user", &format!("m{i}"), None, 0, 0)
                .unwrap();
        }
        store.save_summary(&conv.id, "earlier: setup discussion", 5).unwrap();

        let messages = build_context(&store, &conv.id, "next").unwrap();
        // summary pair + RECENT_WINDOW + new message.
        assert_eq!(messages.len(), 2 + RECENT_WINDOW as usize + 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.extract_all_text().contains("summary"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(
            messages[1].content.extract_all_text(),
            "earlier: setup discussion"
        );
    }

    #[test]
    fn long_conversation_without_summary_has_no_pair() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation("c").unwrap();
        for i in 0..25 {
            store
                .append_message(&conv.id, "user", &format!("m{i}"), None, 0, 0)
                .unwrap();
        }

        let messages = build_context(&store, &conv.id, "next").unwrap();
        assert_eq!(messages.len(), RECENT_WINDOW as usize + 1);
    }

    #[test]
    fn refresh_condition_tracks_threshold_and_gap() {
        // Below threshold: never.
        assert!(!needs_summary_refresh(29, None));
        // At threshold with no summary: refresh.
        assert!(needs_summary_refresh(30, None));

        let summary = SummaryRow {
            conversation_id: "c".into(),
            text: "s".into(),
            messages_covered: 10,
            created_at: String::new(),
        };
        // 50 - 10 - 20 = 20 >= 20: refresh.
        assert!(needs_summary_refresh(50, Some(&summary)));
        // 49 - 10 - 20 = 19 < 20: not yet.
        assert!(!needs_summary_refresh(49, Some(&summary)));
    }
}
