//! Memory record types.
//!
//! A [`MemoryRecord`] is a shared base (id, timestamps, metadata, optional
//! embedding and relationships) plus a per-kind [`RecordPayload`]. On disk the
//! payload is flattened into the record, so a line looks like
//! `{"id":"f1","type":"fact","fact":"...","timestamp":"..."}`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AtomicityConfig;
use crate::error::ValidationError;
use crate::text;

/// Kind of memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A single atomic statement of knowledge
    Fact,
    /// A conversation turn
    Dialog,
    /// Decisions, assignments and other project-management notes
    Management,
    /// A file with an optional summary
    File,
    /// A diff against a file
    FileDiff,
    /// A code excerpt
    Code,
    /// A semantic summary of a code symbol
    CodeSemanticSummary,
    /// A free-standing summary
    Summary,
    /// A summary of a whole conversation
    ConversationSummary,
    /// An error observed upstream
    Error,
    /// Anything else
    Other,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Dialog => "dialog",
            Self::Management => "management",
            Self::File => "file",
            Self::FileDiff => "file_diff",
            Self::Code => "code",
            Self::CodeSemanticSummary => "code_semantic_summary",
            Self::Summary => "summary",
            Self::ConversationSummary => "conversation_summary",
            Self::Error => "error",
            Self::Other => "other",
        }
    }

    pub fn all() -> &'static [RecordKind] {
        &[
            Self::Fact,
            Self::Dialog,
            Self::Management,
            Self::File,
            Self::FileDiff,
            Self::Code,
            Self::CodeSemanticSummary,
            Self::Summary,
            Self::ConversationSummary,
            Self::Error,
            Self::Other,
        ]
    }

    /// Whether the primary text of this kind is held to the atomicity limit.
    ///
    /// Artifact kinds (files, diffs, code and summaries of them) are chunked
    /// upstream and carry their own size discipline.
    pub fn requires_atomic(&self) -> bool {
        matches!(
            self,
            Self::Fact | Self::Dialog | Self::Management | Self::Error | Self::Other
        )
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown record kind: '{s}'"))
    }
}

/// Kind-specific payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordPayload {
    Fact {
        fact: String,
    },
    Dialog {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speaker: Option<String>,
    },
    Management {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
    File {
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    FileDiff {
        file: String,
        diff: String,
    },
    Code {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
    CodeSemanticSummary {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
    Summary {
        summary: String,
    },
    ConversationSummary {
        summary: String,
    },
    Error {
        content: String,
    },
    Other {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl RecordPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Fact { .. } => RecordKind::Fact,
            Self::Dialog { .. } => RecordKind::Dialog,
            Self::Management { .. } => RecordKind::Management,
            Self::File { .. } => RecordKind::File,
            Self::FileDiff { .. } => RecordKind::FileDiff,
            Self::Code { .. } => RecordKind::Code,
            Self::CodeSemanticSummary { .. } => RecordKind::CodeSemanticSummary,
            Self::Summary { .. } => RecordKind::Summary,
            Self::ConversationSummary { .. } => RecordKind::ConversationSummary,
            Self::Error { .. } => RecordKind::Error,
            Self::Other { .. } => RecordKind::Other,
        }
    }

    /// The main text of the record, if it has any.
    ///
    /// For files this is the summary when present, else the file body.
    pub fn primary_text(&self) -> Option<&str> {
        let text = match self {
            Self::Fact { fact } => Some(fact.as_str()),
            Self::Dialog { content, .. }
            | Self::Management { content, .. }
            | Self::Code { content, .. }
            | Self::CodeSemanticSummary { content, .. }
            | Self::Error { content } => Some(content.as_str()),
            Self::File {
                summary, content, ..
            } => summary
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .or(content.as_deref()),
            Self::FileDiff { diff, .. } => Some(diff.as_str()),
            Self::Summary { summary } | Self::ConversationSummary { summary } => {
                Some(summary.as_str())
            }
            Self::Other { content } => content.as_deref(),
        };
        text.filter(|t| !t.trim().is_empty())
    }

    fn primary_text_mut(&mut self) -> Option<&mut String> {
        match self {
            Self::Fact { fact } => Some(fact),
            Self::Dialog { content, .. }
            | Self::Management { content, .. }
            | Self::Code { content, .. }
            | Self::CodeSemanticSummary { content, .. }
            | Self::Error { content } => Some(content),
            Self::File {
                summary: Some(summary),
                ..
            } if !summary.trim().is_empty() => Some(summary),
            Self::File { content, .. } => content.as_mut(),
            Self::FileDiff { diff, .. } => Some(diff),
            Self::Summary { summary } | Self::ConversationSummary { summary } => Some(summary),
            Self::Other { content } => content.as_mut(),
        }
    }

    /// The file this payload refers to, for file and diff records.
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::File { file, .. } | Self::FileDiff { file, .. } => Some(file.as_str()),
            _ => None,
        }
    }
}

/// Open metadata describing where a record came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "sourceKind")]
    pub source_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "sourceId")]
    pub source_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "sessionId")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "messageId")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "chunkId")]
    pub chunk_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "docType")]
    pub doc_type: Option<String>,

    /// Keys this crate does not interpret, kept as written
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RecordMetadata {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Case-insensitive match of an entity/category label against the
    /// descriptive metadata fields (doc type, repository, path, source kind,
    /// and free-form `category` / `entity` keys).
    pub fn matches_label(&self, label: &str) -> bool {
        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return false;
        }

        let fixed = [
            self.doc_type.as_deref(),
            self.repository.as_deref(),
            self.path.as_deref(),
            self.source_kind.as_deref(),
        ];
        let extra = ["category", "entity"]
            .into_iter()
            .filter_map(|key| self.extra.get(key).and_then(|v| v.as_str()));

        fixed
            .into_iter()
            .flatten()
            .chain(extra)
            .any(|value| value.to_lowercase().contains(&label))
    }

    /// Whether any descriptive field is populated at all.
    pub fn has_descriptive_fields(&self) -> bool {
        self.doc_type.is_some()
            || self.repository.is_some()
            || self.path.is_some()
            || self.source_kind.is_some()
            || self.extra.contains_key("category")
            || self.extra.contains_key("entity")
    }
}

/// Kind of a declared edge between two records.
///
/// Unknown kinds are kept verbatim in [`RelationshipKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipKind {
    /// Marks the seed of a traversal; never stored on an edge by this crate
    Root,
    Parent,
    Child,
    Derived,
    Next,
    Prev,
    Custom(String),
}

impl RelationshipKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Root => "root",
            Self::Parent => "parent",
            Self::Child => "child",
            Self::Derived => "derived",
            Self::Next => "next",
            Self::Prev => "prev",
            Self::Custom(kind) => kind,
        }
    }
}

impl From<String> for RelationshipKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "root" => Self::Root,
            "parent" => Self::Parent,
            "child" => Self::Child,
            "derived" => Self::Derived,
            "next" => Self::Next,
            "prev" => Self::Prev,
            _ => Self::Custom(value),
        }
    }
}

impl From<&str> for RelationshipKind {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<RelationshipKind> for String {
    fn from(value: RelationshipKind) -> Self {
        match value {
            RelationshipKind::Custom(kind) => kind,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing edge from one record to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(alias = "targetId")]
    pub target_id: String,

    /// Absent on the stored edge means unknown, not "related"
    #[serde(default, alias = "relationship", alias = "relationshipKind")]
    pub kind: Option<RelationshipKind>,
}

/// A stored memory record. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique, stable ID
    pub id: String,

    /// Kind tag and kind-specific fields
    #[serde(flatten)]
    pub payload: RecordPayload,

    /// When the remembered event happened
    pub timestamp: DateTime<Utc>,

    /// When the record was written
    #[serde(alias = "ingestedAt")]
    pub ingested_at: DateTime<Utc>,

    /// Upstream hint that the record matters
    #[serde(default)]
    pub salient: bool,

    #[serde(default, skip_serializing_if = "RecordMetadata::is_empty")]
    pub metadata: RecordMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl MemoryRecord {
    /// Create a record with a generated `mem_<uuid>` id, stamped now.
    pub fn new(payload: RecordPayload) -> Self {
        let now = Utc::now();
        Self {
            id: format!("mem_{}", uuid::Uuid::new_v4().simple()),
            payload,
            timestamp: now,
            ingested_at: now,
            salient: false,
            metadata: RecordMetadata::default(),
            embedding: None,
            relationships: Vec::new(),
        }
    }

    pub fn fact(fact: impl Into<String>) -> Self {
        Self::new(RecordPayload::Fact { fact: fact.into() })
    }

    pub fn dialog(content: impl Into<String>) -> Self {
        Self::new(RecordPayload::Dialog {
            content: content.into(),
            speaker: None,
        })
    }

    pub fn management(content: impl Into<String>) -> Self {
        Self::new(RecordPayload::Management {
            content: content.into(),
            action: None,
        })
    }

    pub fn file(file: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(RecordPayload::File {
            file: file.into(),
            summary: Some(summary.into()),
            content: None,
        })
    }

    pub fn file_diff(file: impl Into<String>, diff: impl Into<String>) -> Self {
        Self::new(RecordPayload::FileDiff {
            file: file.into(),
            diff: diff.into(),
        })
    }

    pub fn code(content: impl Into<String>) -> Self {
        Self::new(RecordPayload::Code {
            content: content.into(),
            language: None,
            symbol: None,
        })
    }

    pub fn summary(summary: impl Into<String>) -> Self {
        Self::new(RecordPayload::Summary {
            summary: summary.into(),
        })
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(RecordPayload::Error {
            content: content.into(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the event time. Ingestion time is moved forward if it would
    /// otherwise precede the event.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        if self.ingested_at < timestamp {
            self.ingested_at = timestamp;
        }
        self
    }

    pub fn with_ingested_at(mut self, ingested_at: DateTime<Utc>) -> Self {
        self.ingested_at = ingested_at;
        self
    }

    pub fn with_metadata(mut self, metadata: RecordMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_relationship(
        mut self,
        target_id: impl Into<String>,
        kind: Option<RelationshipKind>,
    ) -> Self {
        self.relationships.push(Relationship {
            target_id: target_id.into(),
            kind,
        });
        self
    }

    pub fn salient(mut self) -> Self {
        self.salient = true;
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    pub fn primary_text(&self) -> Option<&str> {
        self.payload.primary_text()
    }

    /// Content-presence check used before ranking.
    pub fn has_content(&self) -> bool {
        self.primary_text().is_some()
    }

    /// Everything worth matching against a query: the primary text plus the
    /// file name and symbol, if any.
    pub fn matching_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(file) = self.payload.file() {
            parts.push(file);
        }
        match &self.payload {
            RecordPayload::Code {
                symbol: Some(symbol),
                ..
            }
            | RecordPayload::CodeSemanticSummary {
                symbol: Some(symbol),
                ..
            } => parts.push(symbol),
            _ => {}
        }
        if let Some(text) = self.primary_text() {
            parts.push(text);
        }
        parts.join(" ")
    }

    /// Check the write-boundary invariants.
    pub fn validate(&self, atomicity: &AtomicityConfig) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }

        if let RecordPayload::Fact { fact } = &self.payload {
            if fact.trim().is_empty() {
                return Err(ValidationError::EmptyFact {
                    id: self.id.clone(),
                });
            }
        }

        let Some(primary) = self.primary_text() else {
            return Err(ValidationError::MissingContent {
                id: self.id.clone(),
                kind: self.kind(),
            });
        };

        if self.kind().requires_atomic() {
            let chars = text::char_len(primary);
            let newlines = primary.matches('\n').count();
            if chars > atomicity.max_chars || newlines > atomicity.max_newlines {
                return Err(ValidationError::NonAtomic {
                    id: self.id.clone(),
                    chars,
                    newlines,
                    max_chars: atomicity.max_chars,
                    max_newlines: atomicity.max_newlines,
                });
            }
        }

        if self.timestamp > self.ingested_at {
            return Err(ValidationError::TimestampAfterIngestion {
                id: self.id.clone(),
                timestamp: self.timestamp,
                ingested_at: self.ingested_at,
            });
        }

        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err(ValidationError::EmptyEmbedding {
                    id: self.id.clone(),
                });
            }
            if embedding.iter().any(|x| !x.is_finite()) {
                return Err(ValidationError::NonFiniteEmbedding {
                    id: self.id.clone(),
                });
            }
        }

        if self
            .relationships
            .iter()
            .any(|rel| rel.target_id.trim().is_empty())
        {
            return Err(ValidationError::EmptyRelationshipTarget {
                id: self.id.clone(),
            });
        }

        Ok(())
    }

    /// Cut the primary text down to the atomicity limit: at most
    /// `max_newlines + 1` lines and `max_chars` characters.
    ///
    /// Returns true if anything was removed.
    pub fn truncate_to_atomic(&mut self, atomicity: &AtomicityConfig) -> bool {
        if !self.kind().requires_atomic() {
            return false;
        }
        let Some(primary) = self.payload.primary_text_mut() else {
            return false;
        };

        let lines: Vec<&str> = primary.split('\n').collect();
        let kept_lines = if lines.len() > atomicity.max_newlines + 1 {
            lines[..=atomicity.max_newlines].join("\n")
        } else {
            primary.clone()
        };
        let kept: String = kept_lines.chars().take(atomicity.max_chars).collect();
        let kept = kept.trim_end().to_string();

        if kept == *primary {
            return false;
        }
        *primary = kept;
        true
    }
}

/// A record paired with its salience score. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMemory {
    pub memory: MemoryRecord,
    pub score: f32,
    pub breakdown: ScoreBreakdown,
}

/// The weighted components that make up a salience score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub recency: f32,
    pub frequency: f32,
    pub relevance: f32,
    pub kind: f32,
    pub salient: f32,
}
