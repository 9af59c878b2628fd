//! Configuration for the memory system.
//!
//! Loaded from TOML. Every field has a default so a partial file only needs
//! to name what it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{EMPTY_BODY, FOOTER, TRUNCATION_MARKER};
use crate::error::ConfigError;
use crate::text;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemosConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub context: ContextConfig,
}

impl MnemosConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading memory configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.atomicity.max_chars == 0 {
            return Err(ConfigError::Invalid(
                "store.atomicity.max_chars must be greater than 0".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimension must be greater than 0".into(),
            ));
        }
        if self.embedding.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "embedding.timeout_ms must be greater than 0".into(),
            ));
        }
        if self.retrieval.k == 0 {
            return Err(ConfigError::Invalid("retrieval.k must be greater than 0".into()));
        }
        if self.context.max_count == 0 {
            return Err(ConfigError::Invalid(
                "context.max_count must be greater than 0".into(),
            ));
        }
        let minimum = ContextConfig::minimum_total_length();
        if self.context.max_total_length < minimum {
            return Err(ConfigError::Invalid(format!(
                "context.max_total_length must be at least {minimum} (footer plus truncation marker)"
            )));
        }
        if self.ranking.recency_half_life_hours <= 0.0 {
            return Err(ConfigError::Invalid(
                "ranking.recency_half_life_hours must be positive".into(),
            ));
        }
        let w = &self.ranking.weights;
        if [w.recency, w.frequency, w.relevance, w.kind, w.salient]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            return Err(ConfigError::Invalid(
                "ranking.weights must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// What the writer does with content over the atomicity limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicityPolicy {
    /// Fail the append with a validation error
    #[default]
    Reject,
    /// Cut the content to the limit and store the rest
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicityConfig {
    #[serde(default = "default_atomic_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_atomic_max_newlines")]
    pub max_newlines: usize,

    #[serde(default)]
    pub policy: AtomicityPolicy,
}

fn default_atomic_max_chars() -> usize {
    512
}

fn default_atomic_max_newlines() -> usize {
    3
}

impl Default for AtomicityConfig {
    fn default() -> Self {
        Self {
            max_chars: default_atomic_max_chars(),
            max_newlines: default_atomic_max_newlines(),
            policy: AtomicityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the line-delimited JSON store
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub atomicity: AtomicityConfig,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/memory.jsonl")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            atomicity: AtomicityConfig::default(),
        }
    }
}

/// Which embedding backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Deterministic local feature hashing
    #[default]
    Hashing,
    /// fastembed ONNX models (requires the `fastembed` feature)
    Fastembed,
    /// External program printing a JSON array of vectors
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Output dimension every vector is normalised to
    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,

    /// Per-call timeout for embedding generation
    #[serde(default = "default_embedding_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,

    /// Required when `backend = "command"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandConfig>,
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".into()
}

fn default_embedding_dim() -> usize {
    384 // MiniLM dimension
}

fn default_embedding_timeout() -> u64 {
    5_000
}

fn default_cache_ttl() -> u64 {
    30 * 60
}

fn default_cache_max_entries() -> u64 {
    1_024
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model: default_embedding_model(),
            dimension: default_embedding_dim(),
            timeout_ms: default_embedding_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            command: None,
        }
    }
}

/// Relative weight of each salience component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalienceWeights {
    #[serde(default = "default_recency_weight")]
    pub recency: f32,

    #[serde(default = "default_frequency_weight")]
    pub frequency: f32,

    #[serde(default = "default_relevance_weight")]
    pub relevance: f32,

    /// Bonus by record kind (facts and decisions over chatter)
    #[serde(default = "default_kind_weight")]
    pub kind: f32,

    #[serde(default = "default_salient_weight")]
    pub salient: f32,
}

fn default_recency_weight() -> f32 {
    0.30
}

fn default_frequency_weight() -> f32 {
    0.15
}

fn default_relevance_weight() -> f32 {
    0.40
}

fn default_kind_weight() -> f32 {
    0.10
}

fn default_salient_weight() -> f32 {
    0.05
}

impl Default for SalienceWeights {
    fn default() -> Self {
        Self {
            recency: default_recency_weight(),
            frequency: default_frequency_weight(),
            relevance: default_relevance_weight(),
            kind: default_kind_weight(),
            salient: default_salient_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub weights: SalienceWeights,

    /// Age at which the recency component halves
    #[serde(default = "default_half_life")]
    pub recency_half_life_hours: f64,

    /// Cosine similarity above which two records reinforce each other
    #[serde(default = "default_semantic_threshold")]
    pub semantic_reinforcement_threshold: f32,

    /// Token Jaccard above which two records reinforce each other when they
    /// have no comparable embeddings
    #[serde(default = "default_lexical_threshold")]
    pub lexical_reinforcement_threshold: f32,
}

fn default_half_life() -> f64 {
    72.0
}

fn default_semantic_threshold() -> f32 {
    0.82
}

fn default_lexical_threshold() -> f32 {
    0.6
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: SalienceWeights::default(),
            recency_half_life_hours: default_half_life(),
            semantic_reinforcement_threshold: default_semantic_threshold(),
            lexical_reinforcement_threshold: default_lexical_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates returned per query
    #[serde(default = "default_k")]
    pub k: usize,

    /// Minimum cosine similarity for a semantic hit
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Recent records pulled from the store alongside retrieval
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_k() -> usize {
    8
}

fn default_min_similarity() -> f32 {
    0.2
}

fn default_recent_limit() -> usize {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            min_similarity: default_min_similarity(),
            recent_limit: default_recent_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Top-ranked records used as traversal seeds
    #[serde(default = "default_seed_count")]
    pub seed_count: usize,
}

fn default_max_depth() -> usize {
    2
}

fn default_seed_count() -> usize {
    3
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            seed_count: default_seed_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum records rendered into a block
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Hard ceiling on the rendered block, in characters
    #[serde(default = "default_max_total_length")]
    pub max_total_length: usize,

    /// Ceiling for a single rendered record, in characters
    #[serde(default = "default_max_record_chars")]
    pub max_record_chars: usize,
}

fn default_max_count() -> usize {
    12
}

fn default_max_total_length() -> usize {
    10_000
}

fn default_max_record_chars() -> usize {
    800
}

impl ContextConfig {
    /// Smallest budget that still fits the footer plus either the empty-block
    /// placeholders or a truncation marker.
    pub fn minimum_total_length() -> usize {
        let body = text::char_len(EMPTY_BODY).max(text::char_len(TRUNCATION_MARKER) + 2);
        text::char_len(FOOTER) + 2 + body
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            max_total_length: default_max_total_length(),
            max_record_chars: default_max_record_chars(),
        }
    }
}
