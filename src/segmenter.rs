//! Story text → speakable sentences.
//!
//! A sentence is a run of text followed by its terminators (`.`, `!`, `?`
//! or newline) and an optional closing quote. Text after the last
//! terminator is kept as the final sentence.

use std::sync::LazyLock;

use regex::Regex;

static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^.!?\n]+[.!?\n]+["']?|[^.!?\n]+$"#).expect("sentence pattern is valid")
});

/// Split `text` into trimmed, non-empty sentences in reading order.
pub fn segment(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let sentences: Vec<String> = SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if sentences.is_empty() {
        // Punctuation-only text: read it as one unit rather than nothing.
        return vec![trimmed.to_string()];
    }

    sentences
}
