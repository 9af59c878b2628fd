//! Section classification and artifact extraction.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ClassifyError;
use crate::types::{MemoryRecord, RecordKind, RecordPayload};

pub(crate) static FILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:[A-Za-z0-9_.\-]+/)*[A-Za-z0-9_\-]+\.(?:rs|py|js|jsx|ts|tsx|go|java|kt|c|h|cc|cpp|hpp|cs|rb|php|swift|toml|yaml|yml|json|jsonl|md|sql|sh|html|css|lock)\b",
    )
    .unwrap()
});

static DECLARED_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:class|struct|enum|trait|interface|impl)\s+([A-Z][A-Za-z0-9_]*)").unwrap()
});

pub(crate) static CAMEL_CASE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)+)\b").unwrap());

static DECLARED_FN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:fn|def|function|func)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

pub(crate) static CALL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)*)\(").unwrap()
});

static INTEGRATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:integrat(?:es|ed|ion)\s+with|connects?\s+to|talks?\s+to|depends\s+on|hooks?\s+into|calls?\s+out\s+to)\s+(?:the\s+)?([A-Za-z0-9_\-]+(?:\s+(?:api|service|endpoint|client|server|queue|database|webhook))?)",
    )
    .unwrap()
});

static IMPLEMENTATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:implement(?:ed|s|ing)?|refactor(?:ed|s|ing)?|fix(?:ed|es)?\s+(?:a\s+|the\s+)?bug|patch(?:ed)?|added\s+(?:a\s+)?(?:function|method|test)|rewrote|renamed)\b|::|=>|\bfn\s|\{\s*$",
    )
    .unwrap()
});

static TECHNICAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:api|database|schema|config(?:uration)?|protocol|endpoint|latency|thread|async|compiler|kernel|runtime|index|query|cache|server|client|embedding|vector|dependency|crate|library|binary|stack trace|exception|panic)\b",
    )
    .unwrap()
});

static CONCEPTUAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:decid(?:e|ed|ing)|decision|chose|choose|design|architecture|approach|principle|strategy|concept|tradeoff|trade-off|rationale|goal|plan(?:ned)?|prefer(?:red)?|agreed)\b",
    )
    .unwrap()
});

const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "match", "return", "switch", "catch", "and", "or", "not", "see", "e.g",
];

/// Section a record is filed under in the context block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Technical,
    Conceptual,
    Implementation,
    Other,
}

impl Category {
    pub fn all() -> [Category; 4] {
        [
            Category::Technical,
            Category::Conceptual,
            Category::Implementation,
            Category::Other,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technical => "technical",
            Category::Conceptual => "conceptual",
            Category::Implementation => "implementation",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code-level things a record refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub files: BTreeSet<String>,
    pub classes: BTreeSet<String>,
    pub functions: BTreeSet<String>,
    pub integrations: BTreeSet<String>,
}

impl Artifacts {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.classes.is_empty()
            && self.functions.is_empty()
            && self.integrations.is_empty()
    }

    pub fn merge(&mut self, other: &Artifacts) {
        self.files.extend(other.files.iter().cloned());
        self.classes.extend(other.classes.iter().cloned());
        self.functions.extend(other.functions.iter().cloned());
        self.integrations.extend(other.integrations.iter().cloned());
    }

    /// Whether this record's artifacts cover anything `wanted` names. File
    /// names also match by basename, identifiers case-insensitively.
    pub fn mentions_any(&self, wanted: &Artifacts) -> bool {
        let file_hit = wanted.files.iter().any(|w| {
            let w_base = basename(w).to_lowercase();
            self.files.iter().any(|f| {
                f.eq_ignore_ascii_case(w) || basename(f).to_lowercase() == w_base
            })
        });
        let ident_hit = |mine: &BTreeSet<String>, theirs: &BTreeSet<String>| {
            theirs
                .iter()
                .any(|t| mine.iter().any(|m| m.eq_ignore_ascii_case(t)))
        };
        file_hit
            || ident_hit(&self.classes, &wanted.classes)
            || ident_hit(&self.functions, &wanted.functions)
    }
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Pattern-scan free text for artifacts.
pub fn extract_artifacts(text: &str) -> Artifacts {
    let mut artifacts = Artifacts::default();

    for m in FILE_PATTERN.find_iter(text) {
        artifacts.files.insert(m.as_str().to_string());
    }
    for caps in DECLARED_TYPE_PATTERN.captures_iter(text) {
        artifacts.classes.insert(caps[1].to_string());
    }
    for caps in CAMEL_CASE_PATTERN.captures_iter(text) {
        artifacts.classes.insert(caps[1].to_string());
    }
    for caps in DECLARED_FN_PATTERN.captures_iter(text) {
        artifacts.functions.insert(caps[1].to_string());
    }
    for caps in CALL_PATTERN.captures_iter(text) {
        let name = &caps[1];
        if name.chars().count() < 2 || CALL_KEYWORDS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        // `Foo(` is a constructor or tuple struct, already covered above.
        if name.starts_with(|c: char| c.is_ascii_uppercase()) && !name.contains("::") {
            continue;
        }
        artifacts.functions.insert(name.to_string());
    }
    for caps in INTEGRATION_PATTERN.captures_iter(text) {
        artifacts.integrations.insert(caps[1].trim().to_lowercase());
    }

    artifacts
}

/// Artifacts from a record's text, its file field, its path metadata and its
/// code symbol.
pub fn record_artifacts(record: &MemoryRecord) -> Artifacts {
    let mut artifacts = extract_artifacts(&record.matching_text());
    if let Some(file) = record.payload.file() {
        artifacts.files.insert(file.to_string());
    }
    if let Some(path) = &record.metadata.path {
        artifacts.files.insert(path.clone());
    }
    if let RecordPayload::Code {
        symbol: Some(symbol),
        ..
    }
    | RecordPayload::CodeSemanticSummary {
        symbol: Some(symbol),
        ..
    } = &record.payload
    {
        if symbol.starts_with(|c: char| c.is_ascii_uppercase()) {
            artifacts.classes.insert(symbol.clone());
        } else {
            artifacts.functions.insert(symbol.clone());
        }
    }
    artifacts
}

/// Strategy for filing records into sections.
pub trait SectionClassifier: Send + Sync {
    fn classify(&self, record: &MemoryRecord) -> Result<Category, ClassifyError>;

    fn artifacts(&self, record: &MemoryRecord) -> Result<Artifacts, ClassifyError> {
        Ok(record_artifacts(record))
    }
}

/// Kind and keyword rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternClassifier;

impl SectionClassifier for PatternClassifier {
    fn classify(&self, record: &MemoryRecord) -> Result<Category, ClassifyError> {
        match record.kind() {
            RecordKind::Code | RecordKind::FileDiff | RecordKind::CodeSemanticSummary => {
                return Ok(Category::Implementation)
            }
            RecordKind::File | RecordKind::Error => return Ok(Category::Technical),
            _ => {}
        }

        let text = record.primary_text().ok_or_else(|| ClassifyError::NoText {
            id: record.id.clone(),
        })?;

        if IMPLEMENTATION_PATTERN.is_match(text) {
            return Ok(Category::Implementation);
        }
        if FILE_PATTERN.is_match(text)
            || DECLARED_TYPE_PATTERN.is_match(text)
            || TECHNICAL_PATTERN.is_match(text)
        {
            return Ok(Category::Technical);
        }
        if CONCEPTUAL_PATTERN.is_match(text) {
            return Ok(Category::Conceptual);
        }
        Ok(Category::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordMetadata;

    #[test]
    fn test_extract_files_classes_functions() {
        let text = "MemoryStore::append in crates/memory/src/store.rs calls validate() \
                    and struct Snapshot holds records; see fn walk_from for details";
        let a = extract_artifacts(text);
        assert!(a.files.contains("crates/memory/src/store.rs"));
        assert!(a.classes.contains("MemoryStore"));
        assert!(a.classes.contains("Snapshot"));
        assert!(a.functions.contains("validate"));
        assert!(a.functions.contains("walk_from"));
    }

    #[test]
    fn test_extract_integrations() {
        let a = extract_artifacts("The retriever integrates with the embedding service.");
        assert!(a.integrations.contains("embedding service"));
    }

    #[test]
    fn test_extract_ignores_prose() {
        let a = extract_artifacts("We met on monday (briefly) and agreed on a plan.");
        assert!(a.is_empty(), "{a:?}");
    }

    #[test]
    fn test_record_artifacts_include_file_and_path() {
        let record =
            MemoryRecord::file("src/config.rs", "loads toml").with_metadata(RecordMetadata {
                path: Some("crates/memory/src/config.rs".into()),
                ..Default::default()
            });
        let a = record_artifacts(&record);
        assert!(a.files.contains("src/config.rs"));
        assert!(a.files.contains("crates/memory/src/config.rs"));
    }

    #[test]
    fn test_mentions_any_matches_basename() {
        let mut mine = Artifacts::default();
        mine.files.insert("crates/memory/src/store.rs".into());
        let wanted = extract_artifacts("what does store.rs do");
        assert!(mine.mentions_any(&wanted));
        let other = extract_artifacts("what does graph.rs do");
        assert!(!mine.mentions_any(&other));
    }

    #[test]
    fn test_classify_by_kind_and_keywords() {
        let c = PatternClassifier;
        assert_eq!(
            c.classify(&MemoryRecord::code("fn main() {}")).unwrap(),
            Category::Implementation
        );
        assert_eq!(
            c.classify(&MemoryRecord::file("a.rs", "entry point")).unwrap(),
            Category::Technical
        );
        assert_eq!(
            c.classify(&MemoryRecord::fact("We decided on a layered architecture"))
                .unwrap(),
            Category::Conceptual
        );
        assert_eq!(
            c.classify(&MemoryRecord::fact("The database schema has three tables"))
                .unwrap(),
            Category::Technical
        );
        assert_eq!(
            c.classify(&MemoryRecord::dialog("Refactored the loader today"))
                .unwrap(),
            Category::Implementation
        );
        assert_eq!(
            c.classify(&MemoryRecord::dialog("good morning everyone")).unwrap(),
            Category::Other
        );
    }

    #[test]
    fn test_classify_without_text_errors() {
        let record = MemoryRecord::fact("").with_id("empty");
        assert_eq!(
            PatternClassifier.classify(&record),
            Err(ClassifyError::NoText { id: "empty".into() })
        );
    }
}
