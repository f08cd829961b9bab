// ── Classifier (C5) ───────────────────────────────────────────────────────
// Maps (prompt, source) → complexity tier, transcribed directly from spec
// §4.4 — this is the one component where the written spec, not the teacher,
// is the primary source: the teacher has no complexity classifier.

use crate::atoms::constants::{CHAT_SOURCES, CODING_KEYWORDS, COMPLEX_SOURCES};
use crate::atoms::types::Complexity;

/// Classifies a prompt for a given source into a complexity tier.
pub fn classify(prompt: &str, source: &str) -> Complexity {
    let source_lc = source.to_lowercase();

    if COMPLEX_SOURCES.iter().any(|s| *s == source_lc) {
        return Complexity::Complex;
    }

    if contains_coding_keyword(prompt) {
        return Complexity::Complex;
    }

    let len = prompt.chars().count();
    if len > 2000 {
        return Complexity::Complex;
    }

    let is_chat_source = CHAT_SOURCES.iter().any(|s| *s == source_lc);

    if prompt.is_empty() {
        return if is_chat_source { Complexity::Simple } else { Complexity::Standard };
    }

    if len < 100 && is_chat_source {
        return Complexity::Simple;
    }

    Complexity::Standard
}

fn contains_coding_keyword(prompt: &str) -> bool {
    let lowered = prompt.to_lowercase();
    CODING_KEYWORDS.iter().any(|kw| {
        if kw.is_ascii() {
            lowered.contains(&kw.to_lowercase())
        } else {
            // Japanese keywords are matched against the raw prompt — casing
            // doesn't apply to these scripts.
            prompt.contains(kw)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_override_forces_complex() {
        assert_eq!(classify("hi", "cron"), Complexity::Complex);
        assert_eq!(classify("hi", "Workflow"), Complexity::Complex);
        assert_eq!(classify("hi", "agent-comm"), Complexity::Complex);
    }

    #[test]
    fn long_prompt_forces_complex() {
        let long = "a".repeat(2001);
        assert_eq!(classify(&long, "discord"), Complexity::Complex);
    }

    #[test]
    fn coding_keyword_forces_complex_even_in_chat() {
        assert_eq!(classify("can you refactor this?", "discord"), Complexity::Complex);
        assert_eq!(classify("実装してください", "line"), Complexity::Complex);
    }

    #[test]
    fn short_chat_prompt_without_keyword_is_simple() {
        assert_eq!(classify("hey there", "discord"), Complexity::Simple);
    }

    #[test]
    fn short_non_chat_prompt_is_standard() {
        assert_eq!(classify("hey there", "api"), Complexity::Standard);
    }

    #[test]
    fn empty_prompt_rules() {
        assert_eq!(classify("", "discord"), Complexity::Simple);
        assert_eq!(classify("", "api"), Complexity::Standard);
    }

    #[test]
    fn mid_length_non_keyword_prompt_is_standard() {
        let mid = "a".repeat(500);
        assert_eq!(classify(&mid, "discord"), Complexity::Standard);
    }
}
