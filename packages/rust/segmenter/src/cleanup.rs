//! Plain-text cleanup passes applied to section text.

use std::sync::LazyLock;

use regex::Regex;

/// Default number of words kept in a brief.
pub const BRIEF_WORDS: usize = 30;

/// Remove URLs and collapse whitespace.
pub fn clean_text(text: &str) -> String {
    static URL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

    let without_urls = URL_RE.replace_all(text, "");
    without_urls.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max_words` words of `text`, with `...` appended when truncated.
pub fn brief(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out = words
        .iter()
        .take(max_words)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > max_words {
        out.push_str("...");
    }
    out
}
