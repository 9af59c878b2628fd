//! Small text helpers shared by ranking, retrieval and assembly.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "my", "no", "not",
    "of", "on", "or", "our", "out", "over", "should", "so", "some", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "to", "up", "us", "was", "we",
    "were", "what", "when", "where", "which", "who", "why", "will", "with", "would", "you",
    "your",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Strip a few common English suffixes so "files"/"file" and
/// "indexed"/"index" meet.
fn stem(token: &str) -> String {
    let len = token.chars().count();
    for (suffix, min_len) in [("ing", 6), ("ed", 5), ("s", 4)] {
        if len >= min_len && token.ends_with(suffix) && !token.ends_with("ss") {
            return token[..token.len() - suffix.len()].to_string();
        }
    }
    token.to_string()
}

/// Lowercased, stemmed content tokens in order of appearance. Stop words and
/// single characters are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|raw| raw.chars().count() > 1)
        .map(|raw| raw.to_lowercase())
        .filter(|token| !is_stop_word(token))
        .map(|token| stem(&token))
        .collect()
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Fraction of query tokens present in the document, in `[0, 1]`.
pub fn lexical_overlap(query: &HashSet<String>, document: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let hits = query.iter().filter(|t| document.contains(*t)).count();
    hits as f32 / query.len() as f32
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Truncate to at most `max_len` characters including the `...` suffix.
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    if char_len(s) <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return s.chars().take(max_len).collect();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{}...", kept.trim_end())
}
