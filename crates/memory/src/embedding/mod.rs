//! Embedding providers and the adapter that normalises them.
//!
//! Providers turn text into vectors. The [`EmbeddingAdapter`] sits in front
//! of whichever provider is configured and guarantees that every vector it
//! hands out has the configured dimension and is non-zero, so a backend swap
//! (say a 384-dim local model to a 1536-dim hosted one) never leaks
//! mismatched vectors into similarity search.

mod command;
#[cfg(feature = "fastembed")]
mod fastembed;
mod hashing;
mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cache::TtlCache;
use crate::config::{EmbeddingBackend, EmbeddingConfig};

pub use command::CommandEmbedder;
#[cfg(feature = "fastembed")]
pub use fastembed::FastEmbedProvider;
pub use hashing::HashingEmbedder;
pub use mock::{FailingEmbedder, StaticEmbedder};

/// Text embedded once during initialization to prove the backend works.
const INIT_PROBE: &str = "mnemos embedding initialization probe";

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Embedding timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Incompatible embeddings: {0}")]
    Incompatible(CompatibilityReport),

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl EmbeddingError {
    /// Whether the caller should degrade to lexical search.
    pub fn is_backend_unavailable(&self) -> bool {
        !matches!(self, Self::Incompatible(_))
    }
}

/// A backend that turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Native output dimension.
    fn dimension(&self) -> usize;

    /// Load models, check connectivity. Must be safe to call repeatedly.
    async fn initialize(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "expected 1 vector, provider returned {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }
}

/// Build the provider named by the configuration.
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.backend {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        EmbeddingBackend::Fastembed => build_fastembed(config),
        EmbeddingBackend::Command => {
            let command = config.command.as_ref().ok_or_else(|| {
                EmbeddingError::ModelInit(
                    "backend \"command\" requires an [embedding.command] section".into(),
                )
            })?;
            Ok(Arc::new(CommandEmbedder::new(
                command.program.clone(),
                command.args.clone(),
                config.model.clone(),
                config.dimension,
            )))
        }
    }
}

#[cfg(feature = "fastembed")]
fn build_fastembed(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    Ok(Arc::new(FastEmbedProvider::from_config(
        &config.model,
        config.dimension,
    )?))
}

#[cfg(not(feature = "fastembed"))]
fn build_fastembed(
    _config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    Err(EmbeddingError::ModelInit(
        "this build does not include the `fastembed` feature".into(),
    ))
}

// ============================================================================
// Vector math
// ============================================================================

pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

/// Cosine similarity in `[-1, 1]`.
///
/// Zero vectors, empty or mismatched lengths and non-finite input all give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !sim.is_finite() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0) as f32
}

/// Truncate or zero-pad to `dimension`.
pub fn normalize_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() != dimension {
        debug!(
            from = vector.len(),
            to = dimension,
            "Normalizing embedding dimension"
        );
        vector.resize(dimension, 0.0);
    }
    vector
}

// ============================================================================
// Compatibility diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorRole {
    Stored,
    Query,
}

impl fmt::Display for VectorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored => f.write_str("stored"),
            Self::Query => f.write_str("query"),
        }
    }
}

/// One reason two vectors cannot be compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum Incompatibility {
    Missing { role: VectorRole },
    ZeroVector { role: VectorRole },
    NonFinite { role: VectorRole },
    DimensionMismatch { stored: usize, query: usize },
    UnexpectedDimension {
        role: VectorRole,
        actual: usize,
        expected: usize,
    },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { role } => write!(f, "{role} vector missing"),
            Self::ZeroVector { role } => write!(f, "{role} vector is all zeros"),
            Self::NonFinite { role } => write!(f, "{role} vector has non-finite values"),
            Self::DimensionMismatch { stored, query } => {
                write!(f, "dimension mismatch: stored {stored} vs query {query}")
            }
            Self::UnexpectedDimension {
                role,
                actual,
                expected,
            } => write!(f, "{role} vector has {actual} dims, expected {expected}"),
        }
    }
}

/// Every incompatibility found between a stored and a query vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub issues: Vec<Incompatibility>,
}

impl CompatibilityReport {
    pub fn is_compatible(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_result(self) -> Result<(), EmbeddingError> {
        if self.is_compatible() {
            Ok(())
        } else {
            Err(EmbeddingError::Incompatible(self))
        }
    }
}

impl fmt::Display for CompatibilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return f.write_str("compatible");
        }
        let parts: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

fn check_vector(
    vector: Option<&[f32]>,
    role: VectorRole,
    expected: Option<usize>,
    issues: &mut Vec<Incompatibility>,
) {
    let Some(v) = vector else {
        issues.push(Incompatibility::Missing { role });
        return;
    };
    if v.iter().any(|x| !x.is_finite()) {
        issues.push(Incompatibility::NonFinite { role });
    } else if is_zero_vector(v) {
        issues.push(Incompatibility::ZeroVector { role });
    }
    if let Some(expected) = expected {
        if v.len() != expected {
            issues.push(Incompatibility::UnexpectedDimension {
                role,
                actual: v.len(),
                expected,
            });
        }
    }
}

/// List every reason `stored` and `query` cannot be compared.
pub fn validate_compatibility(
    stored: Option<&[f32]>,
    query: Option<&[f32]>,
    expected_dimension: Option<usize>,
) -> CompatibilityReport {
    let mut issues = Vec::new();
    check_vector(stored, VectorRole::Stored, expected_dimension, &mut issues);
    check_vector(query, VectorRole::Query, expected_dimension, &mut issues);
    if let (Some(s), Some(q)) = (stored, query) {
        if s.len() != q.len() {
            issues.push(Incompatibility::DimensionMismatch {
                stored: s.len(),
                query: q.len(),
            });
        }
    }
    CompatibilityReport { issues }
}

// ============================================================================
// Adapter
// ============================================================================

struct AdapterState {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    initialized: bool,
}

/// Validating, caching front for an [`EmbeddingProvider`].
pub struct EmbeddingAdapter {
    state: RwLock<AdapterState>,
    init_lock: tokio::sync::Mutex<()>,
    cache: TtlCache<(usize, String), Vec<f32>>,
    timeout: Duration,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            state: RwLock::new(AdapterState {
                provider,
                dimension: config.dimension,
                initialized: false,
            }),
            init_lock: tokio::sync::Mutex::new(()),
            cache: TtlCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_max_entries,
            ),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Build the configured provider and wrap it.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(Self::new(build_provider(config)?, config))
    }

    /// Output dimension every vector is normalised to.
    pub fn dimension(&self) -> usize {
        self.state.read().dimension
    }

    pub fn provider_name(&self) -> String {
        self.state.read().provider.name().to_string()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the output dimension. The next embed call re-initializes.
    pub fn set_dimension(&self, dimension: usize) {
        let mut state = self.state.write();
        if state.dimension == dimension {
            return;
        }
        info!(
            from = state.dimension,
            to = dimension,
            "Embedding dimension changed"
        );
        state.dimension = dimension;
        state.initialized = false;
        self.cache.invalidate_all();
    }

    /// Replace the backend. `dimension` defaults to the provider's native one.
    pub async fn swap_provider(
        &self,
        provider: Arc<dyn EmbeddingProvider>,
        dimension: Option<usize>,
    ) -> Result<(), EmbeddingError> {
        {
            let _guard = self.init_lock.lock().await;
            let mut state = self.state.write();
            info!(
                from = state.provider.name(),
                to = provider.name(),
                "Swapping embedding provider"
            );
            state.dimension = dimension.unwrap_or_else(|| provider.dimension());
            state.provider = provider;
            state.initialized = false;
            self.cache.invalidate_all();
        }
        self.initialize().await
    }

    /// Initialize the provider and verify it yields a non-zero vector.
    /// A no-op once initialized for the current dimension.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), EmbeddingError> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;

        let (provider, dimension) = {
            let state = self.state.read();
            if state.initialized {
                return Ok(());
            }
            (state.provider.clone(), state.dimension)
        };

        info!(
            provider = provider.name(),
            native_dimension = provider.dimension(),
            dimension,
            "Initializing embedding provider"
        );

        self.with_timeout(self.timeout, provider.initialize()).await?;
        let probe = self.with_timeout(self.timeout, provider.embed(INIT_PROBE)).await?;
        let probe = normalize_dimension(probe, dimension);
        if is_zero_vector(&probe) {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "provider '{}' produced a zero vector during initialization",
                provider.name()
            )));
        }

        self.state.write().initialized = true;
        info!(provider = provider.name(), dimension, "Embedding provider ready");
        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        timeout: Duration,
        fut: impl std::future::Future<Output = Result<T, EmbeddingError>>,
    ) -> Result<T, EmbeddingError> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Embed with the adapter's configured timeout.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_timeout(text, self.timeout).await
    }

    /// Embed one text, giving up after `timeout`. The budget covers lazy
    /// initialization as well as the embed call itself.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn embed_with_timeout(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.with_timeout(timeout, self.embed_uncapped(text)).await
    }

    async fn embed_uncapped(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.initialize().await?;
        let (provider, dimension) = {
            let state = self.state.read();
            (state.provider.clone(), state.dimension)
        };

        let key = (dimension, text.to_string());
        if let Some(hit) = self.cache.get(&key) {
            debug!("Embedding cache hit");
            return Ok(hit);
        }

        let raw = provider.embed(text).await?;
        let vector = normalize_dimension(raw, dimension);
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "provider '{}' returned non-finite values",
                provider.name()
            )));
        }
        if is_zero_vector(&vector) {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "provider '{}' returned a zero vector",
                provider.name()
            )));
        }

        self.cache.insert(key, vector.clone());
        Ok(vector)
    }

    /// Embed several texts in one provider call. Fails if any vector comes
    /// back zero.
    #[instrument(skip(self, texts), fields(batch_size = texts.len()))]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.initialize().await?;
        let (provider, dimension) = {
            let state = self.state.read();
            (state.provider.clone(), state.dimension)
        };

        let raw = self
            .with_timeout(self.timeout, provider.embed_batch(texts))
            .await?;
        if raw.len() != texts.len() {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "requested {} vectors, provider returned {}",
                texts.len(),
                raw.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = raw
            .into_iter()
            .map(|v| normalize_dimension(v, dimension))
            .collect();
        if let Some(pos) = vectors.iter().position(|v| is_zero_vector(v)) {
            warn!(index = pos, "Provider returned a zero vector in batch");
            return Err(EmbeddingError::BackendUnavailable(format!(
                "provider '{}' returned a zero vector for input {pos}",
                provider.name()
            )));
        }
        for (text, vector) in texts.iter().zip(vectors.iter()) {
            self.cache.insert((dimension, text.clone()), vector.clone());
        }
        Ok(vectors)
    }

    /// Cosine similarity; see [`cosine_similarity`].
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    /// Check two vectors against each other and the configured dimension.
    pub fn validate_compatibility(
        &self,
        stored: Option<&[f32]>,
        query: Option<&[f32]>,
    ) -> CompatibilityReport {
        validate_compatibility(stored, query, Some(self.dimension()))
    }

    /// Drop every cached vector.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }
}
