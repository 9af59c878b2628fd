//! Category-aware retrieval.
//!
//! Narrows a snapshot to records relevant to the query's working entity,
//! then scores them by embedding similarity. When the embedding backend is
//! down, or nothing has a comparable vector, scoring falls back to lexical
//! overlap. Callers get the same result shape either way.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, EmbeddingAdapter};
use crate::entity::{EntityDetector, RuleBasedDetector};
use crate::salience::salience_order;
use crate::snapshot::Snapshot;
use crate::text::{lexical_overlap, token_set};
use crate::types::{MemoryRecord, RecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPath {
    Semantic,
    Lexical,
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPath::Semantic => f.write_str("semantic"),
            SearchPath::Lexical => f.write_str("lexical"),
        }
    }
}

/// Explicit metadata constraints. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub doc_type: Option<String>,
    pub repository: Option<String>,
    pub path_prefix: Option<String>,
    pub kinds: Vec<RecordKind>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        let meta = &record.metadata;
        let eq = |want: &Option<String>, have: &Option<String>| match want {
            None => true,
            Some(w) => have.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(w)),
        };
        if !eq(&self.doc_type, &meta.doc_type) || !eq(&self.repository, &meta.repository) {
            return false;
        }
        if let Some(prefix) = &self.path_prefix {
            let path = meta.path.as_deref().or(record.payload.file());
            if !path.is_some_and(|p| p.starts_with(prefix.as_str())) {
                return false;
            }
        }
        self.kinds.is_empty() || self.kinds.contains(&record.kind())
    }
}

#[derive(Debug, Clone)]
pub struct RetrieveRequest<'a> {
    pub query: &'a str,
    /// Overrides entity detection when set
    pub entity: Option<&'a str>,
    /// Overrides the configured `k` when set
    pub k: Option<usize>,
    pub filter: MetadataFilter,
    /// Caps the query embedding, including lazy provider initialization.
    /// Defaults to the adapter's configured timeout.
    pub timeout: Option<Duration>,
}

impl<'a> RetrieveRequest<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            entity: None,
            k: None,
            filter: MetadataFilter::default(),
            timeout: None,
        }
    }

    pub fn with_entity(mut self, entity: &'a str) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One retrieval hit. Identical shape on both search paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub id: String,
    pub kind: RecordKind,
    pub content: String,
    pub similarity: f32,
    pub source: Option<String>,
    pub doc_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub chunk_id: Option<String>,
    pub repository: Option<String>,
    pub path: Option<String>,
}

impl RankedCandidate {
    fn new(record: &MemoryRecord, similarity: f32) -> Self {
        let meta = &record.metadata;
        Self {
            id: record.id.clone(),
            kind: record.kind(),
            content: record.primary_text().unwrap_or_default().to_string(),
            similarity,
            source: meta.source_kind.clone().or_else(|| meta.source_id.clone()),
            doc_type: meta.doc_type.clone(),
            timestamp: record.timestamp,
            chunk_id: meta.chunk_id.clone(),
            repository: meta.repository.clone(),
            path: meta.path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub entity: String,
    /// Whether the search was restricted to entity-matching records
    pub scoped: bool,
    pub path: SearchPath,
    pub candidates: Vec<RankedCandidate>,
    /// Query vector, when the backend produced one
    pub query_embedding: Option<Vec<f32>>,
}

impl RetrievalOutcome {
    pub fn ids(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.id.as_str()).collect()
    }
}

pub struct CategoryRetriever {
    adapter: Arc<EmbeddingAdapter>,
    detector: Arc<dyn EntityDetector>,
    config: RetrievalConfig,
}

impl CategoryRetriever {
    pub fn new(adapter: Arc<EmbeddingAdapter>, config: RetrievalConfig) -> Self {
        Self {
            adapter,
            detector: Arc::new(RuleBasedDetector::default()),
            config,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn EntityDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<EmbeddingAdapter> {
        &self.adapter
    }

    pub fn detect_entity(&self, query: &str) -> String {
        self.detector.detect(query)
    }

    /// Retrieve the top `k` records for the request. Never fails.
    #[instrument(skip(self, snapshot, request), fields(query_len = request.query.len()))]
    pub async fn retrieve(
        &self,
        snapshot: &Snapshot,
        request: &RetrieveRequest<'_>,
    ) -> RetrievalOutcome {
        let started = Instant::now();
        let k = request.k.unwrap_or(self.config.k);

        let entity = request
            .entity
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.detector.detect(request.query));

        let eligible: Vec<&MemoryRecord> = snapshot
            .records()
            .iter()
            .filter(|r| r.has_content() && request.filter.matches(r))
            .collect();

        let scoped_set: Vec<&MemoryRecord> = eligible
            .iter()
            .copied()
            .filter(|r| r.metadata.matches_label(&entity))
            .collect();
        let scoped = !scoped_set.is_empty();
        let pool = if scoped { scoped_set } else { eligible };
        debug!(entity = %entity, scoped, pool = pool.len(), "Retrieval pool selected");

        let timeout = request.timeout.unwrap_or_else(|| self.adapter.timeout());
        let query_embedding = match self
            .adapter
            .embed_with_timeout(request.query, timeout)
            .await
        {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Embedding unavailable; using lexical search");
                None
            }
        };

        let (path, scored) = self.score(&pool, request.query, query_embedding.as_deref());

        let mut candidates: Vec<RankedCandidate> = scored
            .into_iter()
            .filter(|(_, sim)| *sim >= self.config.min_similarity)
            .map(|(record, sim)| RankedCandidate::new(record, sim))
            .collect();
        candidates.sort_by(|a, b| {
            salience_order(
                (a.similarity, &a.timestamp, &a.id),
                (b.similarity, &b.timestamp, &b.id),
            )
        });
        candidates.truncate(k);

        info!(
            target: "mnemos::audit",
            event = "retrieval",
            entity = %entity,
            scoped,
            path = %path,
            candidates = candidates.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Retrieved memory candidates"
        );

        RetrievalOutcome {
            entity,
            scoped,
            path,
            candidates,
            query_embedding,
        }
    }

    /// Cosine for records with a comparable vector, lexical overlap for the
    /// rest. The path is semantic if at least one vector was comparable.
    fn score<'r>(
        &self,
        pool: &[&'r MemoryRecord],
        query: &str,
        query_embedding: Option<&[f32]>,
    ) -> (SearchPath, Vec<(&'r MemoryRecord, f32)>) {
        let query_tokens = token_set(query);
        let mut semantic_hits = 0usize;
        let mut incompatible = 0usize;

        let scored = pool
            .iter()
            .map(|&record| {
                if let Some(q) = query_embedding {
                    let report = self
                        .adapter
                        .validate_compatibility(record.embedding.as_deref(), Some(q));
                    if report.is_compatible() {
                        semantic_hits += 1;
                        let stored = record.embedding.as_deref().unwrap_or_default();
                        return (record, cosine_similarity(stored, q));
                    }
                    if record.embedding.is_some() {
                        incompatible += 1;
                        debug!(
                            memory_id = %record.id,
                            report = %report,
                            "Stored embedding not comparable"
                        );
                    }
                }
                let doc_tokens = token_set(&record.matching_text());
                (record, lexical_overlap(&query_tokens, &doc_tokens))
            })
            .collect();

        if incompatible > 0 {
            warn!(incompatible, "Some stored embeddings are incompatible with the query vector");
        }
        let path = if semantic_hits > 0 {
            SearchPath::Semantic
        } else {
            SearchPath::Lexical
        };
        (path, scored)
    }
}
