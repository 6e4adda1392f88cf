//! Tool result truncation -- prevents oversized results from blowing
//! the context window. Critical for the local client, which has a 32k
//! window against the hosted client's 200k.

/// Max fraction of the context window a single tool result may consume.
const MAX_RESULT_SHARE: f64 = 0.3;

/// Absolute cap regardless of window size.
pub const HARD_MAX_CHARS: usize = 100_000;

/// Always keep at least this much of the result.
pub const MIN_KEEP_CHARS: usize = 2_000;

/// The per-result character budget for a round with `num_results`
/// results against a `max_context_tokens` window.
pub fn result_budget(max_context_tokens: u32, num_results: usize) -> usize {
    let budget =
        (max_context_tokens as f64 * 4.0 * MAX_RESULT_SHARE / num_results.max(1) as f64) as usize;
    budget.clamp(MIN_KEEP_CHARS, HARD_MAX_CHARS)
}

/// Truncate a tool result to fit the context budget.
///
/// Keeps head + tail with a marker in between, preferring newline
/// boundaries at the split points to preserve structure.
pub fn truncate_tool_result(result: &str, max_context_tokens: u32, num_results: usize) -> String {
    if result.is_empty() {
        return String::new();
    }

    let budget = result_budget(max_context_tokens, num_results);
    if result.len() <= budget {
        return result.to_string();
    }

    let half = budget / 2;

    // Head boundary: a newline in the first half, unless that gives up
    // more than half the head.
    let mut head_end = result[..floor_char_boundary(result, half)]
        .rfind('\n')
        .unwrap_or(0);
    if head_end < half / 2 {
        head_end = floor_char_boundary(result, half);
    }

    // Tail boundary: a newline near len - half, unless it starts too
    // far in.
    let tail_search_from = floor_char_boundary(result, result.len() - half);
    let mut tail_start = match result[tail_search_from..].find('\n') {
        Some(offset) => tail_search_from + offset,
        None => tail_search_from,
    };
    if tail_start > result.len() - half / 2 {
        tail_start = tail_search_from;
    }

    let omitted = tail_start.saturating_sub(head_end);
    tracing::info!(
        original = result.len(),
        kept = head_end + (result.len() - tail_start),
        omitted,
        "truncated tool result"
    );

    format!(
        "{}\n\n[... {} characters truncated ...]\n\n{}",
        &result[..head_end],
        omitted,
        &result[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_results_pass_through() {
        let result = "only a little output";
        assert_eq!(truncate_tool_result(result, 32_000, 1), result);
    }

    #[test]
    fn empty_result_stays_empty() {
        assert_eq!(truncate_tool_result("", 32_000, 1), "");
    }

    #[test]
    fn budget_splits_across_results() {
        // 32k window, two results: 32000 * 4 * 0.3 / 2 = 19200 each.
        assert_eq!(result_budget(32_000, 2), 19_200);
    }

    #[test]
    fn budget_has_floor_and_ceiling() {
        // Tiny share still keeps MIN_KEEP_CHARS.
        assert_eq!(result_budget(1_000, 10), MIN_KEEP_CHARS);
        // Huge window is capped at HARD_MAX_CHARS.
        assert_eq!(result_budget(200_000, 1), HARD_MAX_CHARS);
    }

    #[test]
    fn oversized_result_is_truncated_with_marker() {
        let result = "x".repeat(50_000);
        let truncated = truncate_tool_result(&result, 32_000, 2);
        assert!(truncated.len() < result.len());
        assert!(truncated.contains("characters truncated"));
        // Within budget plus the marker's own length.
        assert!(truncated.len() <= result_budget(32_000, 2) + 60);
    }

    #[test]
    fn newline_boundaries_preferred() {
        let line = "a line of output that repeats\n";
        let result = line.repeat(2_000);
        let truncated = truncate_tool_result(&result, 32_000, 1);
        let marker_pos = truncated.find("[...").unwrap();
        // The char before the marker's blank separator is a newline.
        let head = &truncated[..marker_pos];
        assert!(head.trim_end_matches('\n').ends_with("repeats"));
    }

    #[test]
    fn head_and_tail_both_survive() {
        let mut result = String::from("HEAD-SENTINEL\n");
        result.push_str(&"middle filler\n".repeat(5_000));
        result.push_str("TAIL-SENTINEL");
        let truncated = truncate_tool_result(&result, 32_000, 1);
        assert!(truncated.starts_with("HEAD-SENTINEL"));
        assert!(truncated.ends_with("TAIL-SENTINEL"));
    }

    #[test]
    fn multibyte_content_does_not_split_chars() {
        let result = "é".repeat(40_000);
        let truncated = truncate_tool_result(&result, 32_000, 2);
        // Must be valid UTF-8 throughout (would have panicked on a bad
        // slice) and carry the marker.
        assert!(truncated.contains("characters truncated"));
    }

    #[test]
    fn result_at_exact_budget_is_untouched() {
        let budget = result_budget(32_000, 1);
        let result = "y".repeat(budget);
        assert_eq!(truncate_tool_result(&result, 32_000, 1), result);
    }
}
