//! Small text helpers shared by the queue worker and event router.

/// Truncates `s` to at most `max_chars` Unicode scalar values, respecting
/// char boundaries (never splitting a multi-byte codepoint).
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Returns `true` if `text` contains something that looks like a URL.
#[must_use]
pub fn contains_url(text: &str) -> bool {
    text.split_whitespace()
        .any(|word| word.starts_with("http://") || word.starts_with("https://"))
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let truncated = truncate_chars(s, 3);
        assert_eq!(truncated, "hél");
    }

    #[test]
    fn truncate_is_a_no_op_under_the_limit() {
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn detects_urls() {
        assert!(contains_url("check this out: https://example.com/x"));
        assert!(!contains_url("no links here"));
    }
}
