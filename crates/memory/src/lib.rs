//! Salience-ranked memory retrieval and context assembly.
//!
//! Records live in an append-only JSON-lines store. A query flows through
//! entity-scoped retrieval, salience ranking, relationship traversal and
//! finally a length-bounded context block with provenance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       CONTEXT PIPELINE                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  query ─► EntityDetector ─► CategoryRetriever ──┐            │
//! │                                 ▲               │            │
//! │                       EmbeddingAdapter          ▼            │
//! │                       (hashing | fastembed   SalienceRanker  │
//! │                        | command)               │            │
//! │                                                 ▼            │
//! │  MemoryStore ─► Snapshot ─────────────────► graph::walk      │
//! │  (JSONL, append-only)                           │            │
//! │                                                 ▼            │
//! │                                         ContextAssembler     │
//! │                                         [FILES] / memory /   │
//! │                                         [INSTRUCTIONS]       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Structured audit events are emitted on the `mnemos::audit` tracing target
//! for store reads, ranking, retrieval and assembly.

pub mod cache;
pub mod classify;
pub mod config;
pub mod context;
pub mod embedding;
pub mod entity;
pub mod error;
pub mod format;
pub mod graph;
pub mod pipeline;
pub mod retrieval;
pub mod salience;
pub mod snapshot;
pub mod store;
pub mod text;
pub mod types;

pub use classify::{Artifacts, Category, PatternClassifier, SectionClassifier};
pub use config::MnemosConfig;
pub use context::{ContextAssembler, ContextBlock, Provenance};
pub use embedding::{EmbeddingAdapter, EmbeddingError, EmbeddingProvider};
pub use entity::{EntityDetector, RuleBasedDetector};
pub use error::{ConfigError, StoreError, ValidationError};
pub use graph::ChainLink;
pub use pipeline::{ContextPipeline, PipelineOutput};
pub use retrieval::{CategoryRetriever, RankedCandidate, RetrieveRequest, SearchPath};
pub use salience::{RankQuery, SalienceRanker};
pub use snapshot::{PartialReadWarning, Snapshot};
pub use store::{AppendOutcome, MemoryStore};
pub use types::{MemoryRecord, RankedMemory, RecordKind, RecordPayload, RelationshipKind};
