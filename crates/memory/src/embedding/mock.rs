//! Providers for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

/// Always unavailable. Drives the lexical fallback path.
pub struct FailingEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(EmbeddingError::BackendUnavailable(
            "embedding backend is offline".into(),
        ))
    }
}

/// Returns a fixed vector per text, or a default for unknown texts.
pub struct StaticEmbedder {
    dimension: usize,
    default: Vec<f32>,
    vectors: HashMap<String, Vec<f32>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticEmbedder {
    pub fn constant(dimension: usize, value: f32) -> Self {
        Self {
            dimension,
            default: vec![value; dimension],
            vectors: HashMap::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn zeros(dimension: usize) -> Self {
        Self::constant(dimension, 0.0)
    }

    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of provider calls, counting one per batch.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    fn name(&self) -> &str {
        "static"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(texts
            .iter()
            .map(|t| self.vectors.get(t).unwrap_or(&self.default).clone())
            .collect())
    }
}
