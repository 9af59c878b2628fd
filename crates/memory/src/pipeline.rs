//! Query to context block, end to end.
//!
//! ```text
//! query ──► retriever ──┐
//!                       ├─► ranker ──► graph walk ──► assembler ──► ContextBlock
//! store ──► recent ─────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::classify::SectionClassifier;
use crate::config::{GraphConfig, MnemosConfig, RetrievalConfig};
use crate::context::{ContextAssembler, ContextBlock};
use crate::embedding::{EmbeddingAdapter, EmbeddingError};
use crate::entity::EntityDetector;
use crate::error::StoreError;
use crate::graph::{self, ChainLink};
use crate::retrieval::{CategoryRetriever, RankedCandidate, RetrieveRequest, SearchPath};
use crate::salience::{top_ids, RankQuery, SalienceRanker};
use crate::snapshot::{PartialReadWarning, Snapshot};
use crate::store::{AppendOutcome, MemoryStore};
use crate::types::{MemoryRecord, RankedMemory};

/// Everything produced for one query, for callers that want more than the
/// block.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub entity: String,
    pub path: SearchPath,
    pub retrieved: Vec<RankedCandidate>,
    pub ranked: Vec<RankedMemory>,
    pub chain: Vec<ChainLink>,
    pub block: ContextBlock,
    pub read_warning: Option<PartialReadWarning>,
}

pub struct ContextPipeline {
    store: Arc<MemoryStore>,
    retriever: CategoryRetriever,
    ranker: SalienceRanker,
    assembler: ContextAssembler,
    retrieval: RetrievalConfig,
    graph: GraphConfig,
}

impl ContextPipeline {
    pub fn new(
        store: Arc<MemoryStore>,
        adapter: Arc<EmbeddingAdapter>,
        config: &MnemosConfig,
    ) -> Self {
        Self {
            store,
            retriever: CategoryRetriever::new(adapter, config.retrieval.clone()),
            ranker: SalienceRanker::new(config.ranking.clone()),
            assembler: ContextAssembler::new(config.context.clone()),
            retrieval: config.retrieval.clone(),
            graph: config.graph.clone(),
        }
    }

    /// Build the store and the configured embedding backend.
    pub fn from_config(config: &MnemosConfig) -> Result<Self, EmbeddingError> {
        let store = Arc::new(MemoryStore::new(&config.store));
        let adapter = Arc::new(EmbeddingAdapter::from_config(&config.embedding)?);
        Ok(Self::new(store, adapter, config))
    }

    pub fn with_detector(mut self, detector: Arc<dyn EntityDetector>) -> Self {
        self.retriever = self.retriever.with_detector(detector);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SectionClassifier>) -> Self {
        self.assembler = self.assembler.with_classifier(classifier);
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn adapter(&self) -> &Arc<EmbeddingAdapter> {
        self.retriever.adapter()
    }

    /// Embed records that lack a vector, then append them. Embedding is best
    /// effort: if the backend is down the records are stored without one.
    /// Ids already in the store are passed through untouched so an
    /// identical re-ingest reports `AlreadyPresent`.
    #[instrument(skip(self, records), fields(batch_size = records.len()))]
    pub async fn ingest(
        &self,
        mut records: Vec<MemoryRecord>,
    ) -> Result<Vec<AppendOutcome>, StoreError> {
        let existing = self.store.snapshot().await?;
        let missing: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.embedding.is_none() && r.has_content())
            .filter(|(_, r)| existing.get(&r.id).is_none())
            .map(|(i, _)| i)
            .collect();

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| records[i].matching_text()).collect();
            match self.adapter().embed_batch(&texts).await {
                Ok(vectors) => {
                    for (i, vector) in missing.into_iter().zip(vectors) {
                        records[i].embedding = Some(vector);
                    }
                }
                Err(e) => warn!(error = %e, "Storing records without embeddings"),
            }
        }

        self.store.append_many(records).await
    }

    /// Run the full flow for `query`. Never fails; a store that cannot be
    /// read is treated as empty.
    pub async fn build_context(&self, query: &str) -> PipelineOutput {
        self.build_context_with_timeout(query, self.adapter().timeout()).await
    }

    /// [`build_context`](Self::build_context) with the query embedding
    /// capped at `timeout`. Past it, retrieval goes lexical.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn build_context_with_timeout(
        &self,
        query: &str,
        timeout: Duration,
    ) -> PipelineOutput {
        let started = Instant::now();

        let snapshot = match self.store.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Memory store unreadable; continuing with no records");
                Snapshot::default()
            }
        };

        let request = RetrieveRequest::new(query).with_timeout(timeout);
        let outcome = self.retriever.retrieve(&snapshot, &request).await;
        let recent = snapshot.recent(self.retrieval.recent_limit);

        let mut seen: HashSet<&str> = HashSet::new();
        let union: Vec<MemoryRecord> = outcome
            .candidates
            .iter()
            .filter_map(|c| snapshot.get(&c.id))
            .chain(recent.iter())
            .filter(|r| seen.insert(r.id.as_str()))
            .cloned()
            .collect();

        let rank_query = RankQuery::new(query).with_embedding(outcome.query_embedding.as_deref());
        let ranked = self.ranker.rank(&union, &rank_query);

        let seeds = top_ids(&ranked, self.graph.seed_count);
        let chain = graph::walk_from(&snapshot, &seeds, self.graph.max_depth);

        let block = self.assembler.assemble(&ranked, &recent, &chain, query);

        info!(
            entity = %outcome.entity,
            path = %outcome.path,
            retrieved = outcome.candidates.len(),
            ranked = ranked.len(),
            chain = chain.len(),
            included = block.provenance.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Built context"
        );

        PipelineOutput {
            entity: outcome.entity,
            path: outcome.path,
            retrieved: outcome.candidates,
            ranked,
            chain,
            block,
            read_warning: snapshot.warning().cloned(),
        }
    }
}
