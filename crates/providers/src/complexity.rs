//! Heuristic complexity scoring for model routing.
//!
//! Pure, synchronous scoring of the latest user message -- no HTTP, no
//! async. The router compares the score against the configured
//! threshold to decide between the local and hosted clients.

use regex::Regex;
use std::sync::OnceLock;

/// Bonus cap: no combination of triggers adds more than this.
const TRIGGER_CAP: i32 = 40;

fn analysis_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(analyz\w*|analys\w*|design\w*|refactor\w*|compar\w*|trade-?offs?|evaluate|architect\w*)\b",
        )
        .expect("analysis regex")
    })
}

fn multistep_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(step[- ]by[- ]step|multi-?step|multiple steps|roadmap|plan out|in stages|one by one)\b")
            .expect("multistep regex")
    })
}

fn greeting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(hi|hey|hello|yo|sup|howdy|good (morning|afternoon|evening))[\s.!?]*$")
            .expect("greeting regex")
    })
}

/// Score a user message in `[0, 100]`.
///
/// Base 50; +10 per trigger (length ≥ 500 chars, fenced code, ≥ 3
/// question marks, analysis keywords, multi-step phrasing), bonus
/// capped; −10 for very short messages, −10 for greeting-only.
pub fn complexity_score(text: &str) -> u8 {
    let mut score: i32 = 50;
    let len = text.chars().count();

    let mut bonus: i32 = 0;
    if len >= 500 {
        bonus += 10;
    }
    if text.contains("```") {
        bonus += 10;
    }
    if text.matches('?').count() >= 3 {
        bonus += 10;
    }
    if analysis_re().is_match(text) {
        bonus += 10;
    }
    if multistep_re().is_match(text) {
        bonus += 10;
    }
    score += bonus.min(TRIGGER_CAP);

    if len < 60 {
        score -= 10;
    }
    if greeting_re().is_match(text) {
        score -= 10;
    }

    score.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_scores_low() {
        // -10 short, -10 greeting-only.
        assert_eq!(complexity_score("hi"), 30);
        assert_eq!(complexity_score("Good morning!"), 30);
        assert!(complexity_score("hey") < 50);
    }

    #[test]
    fn analysis_request_scores_above_threshold() {
        // Analysis keywords are one trigger: 50 + 10, clearing the
        // default routing threshold of 50.
        let score = complexity_score(
            "Analyze the tradeoffs between microservices and monoliths in detail, with examples.",
        );
        assert_eq!(score, 60);
    }

    #[test]
    fn short_plain_question_is_below_default_threshold() {
        assert!(complexity_score("what time is it?") < 50);
    }

    #[test]
    fn fenced_code_adds_bonus() {
        let plain = "fix this function for me please, it is broken somehow";
        let with_code = format!("{plain}\n```rust\nfn broken() {{}}\n```");
        assert!(complexity_score(&with_code) > complexity_score(plain));
    }

    #[test]
    fn many_questions_add_bonus() {
        let msg = "Why does this fail? What changed? How do I fix it and keep it stable?";
        assert!(complexity_score(msg) >= 60);
    }

    #[test]
    fn long_messages_add_bonus() {
        let long = "please summarize the following notes. ".repeat(20);
        assert!(long.len() >= 500);
        assert!(complexity_score(&long) >= 60);
    }

    #[test]
    fn bonus_is_capped() {
        // Every trigger at once still lands within the clamp.
        let msg = format!(
            "Analyze and compare these designs step by step. Why? How? When?\n```\ncode\n```\n{}",
            "padding ".repeat(80)
        );
        assert_eq!(complexity_score(&msg), 90);
    }

    #[test]
    fn score_is_clamped_to_range() {
        for msg in ["", "hi", "ok?"] {
            let s = complexity_score(msg);
            assert!(s <= 100);
        }
    }
}
