//! Working-entity detection for category-scoped retrieval.

use std::sync::LazyLock;

use regex::Regex;

use crate::classify::{basename, CALL_PATTERN, CAMEL_CASE_PATTERN, FILE_PATTERN};
use crate::text::is_stop_word;

/// Label used when no rule fires.
pub const DEFAULT_ENTITY: &str = "general";

const TECHNICAL_TERMS: &[&str] = &[
    "api",
    "authentication",
    "backend",
    "cache",
    "cli",
    "compiler",
    "config",
    "database",
    "deployment",
    "embedding",
    "frontend",
    "graph",
    "kernel",
    "logging",
    "memory",
    "network",
    "parser",
    "ranking",
    "retrieval",
    "scheduler",
    "schema",
    "security",
    "storage",
    "store",
    "testing",
];

static ABOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:about|regarding|concerning|re:)\s+(?:the\s+|our\s+|a\s+|an\s+)?([A-Za-z0-9_\-]+)")
        .unwrap()
});

static COMPONENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bthe\s+([A-Za-z0-9_\-]+)\s+(?:module|service|component|system|crate|library|feature|layer|pipeline)\b",
    )
    .unwrap()
});

/// Strategy that derives a non-empty entity label from a query.
pub trait EntityDetector: Send + Sync {
    /// Same input, same output. Never empty.
    fn detect(&self, query: &str) -> String;
}

/// Ordered rules: explicit code references, then known technical terms,
/// then subject phrases, then [`DEFAULT_ENTITY`].
#[derive(Debug, Clone)]
pub struct RuleBasedDetector {
    technical_terms: Vec<String>,
}

impl Default for RuleBasedDetector {
    fn default() -> Self {
        Self {
            technical_terms: TECHNICAL_TERMS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl RuleBasedDetector {
    pub fn with_terms(terms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            technical_terms: terms.into_iter().map(|t| t.into().to_lowercase()).collect(),
        }
    }

    fn code_reference(query: &str) -> Option<String> {
        if let Some(m) = FILE_PATTERN.find(query) {
            return Some(basename(m.as_str()).to_string());
        }
        if let Some(caps) = CAMEL_CASE_PATTERN.captures(query) {
            return Some(caps[1].to_string());
        }
        CALL_PATTERN
            .captures_iter(query)
            .map(|caps| caps[1].to_string())
            .find(|name| name.chars().count() > 1)
    }

    fn technical_term(&self, query: &str) -> Option<String> {
        query
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .map(str::to_lowercase)
            .find(|word| self.technical_terms.iter().any(|t| t == word))
    }

    fn subject(query: &str) -> Option<String> {
        [&*ABOUT_PATTERN, &*COMPONENT_PATTERN]
            .into_iter()
            .find_map(|pattern| {
                pattern
                    .captures_iter(query)
                    .map(|caps| caps[1].to_lowercase())
                    .find(|word| word.chars().count() > 1 && !is_stop_word(word))
            })
    }
}

impl EntityDetector for RuleBasedDetector {
    fn detect(&self, query: &str) -> String {
        Self::code_reference(query)
            .or_else(|| self.technical_term(query))
            .or_else(|| Self::subject(query))
            .map(|label| label.trim().to_lowercase())
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| DEFAULT_ENTITY.to_string())
    }
}
