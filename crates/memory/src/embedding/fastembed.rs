//! Local ONNX embeddings through fastembed.
//!
//! The model is loaded lazily on the first call and shared afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use tokio::task;
use tracing::{debug, info, instrument, warn};

use super::{EmbeddingError, EmbeddingProvider};

/// Model names accepted in config, with their native dimensions.
const KNOWN_MODELS: &[(&str, EmbeddingModel, usize)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("all-MiniLM-L12-v2", EmbeddingModel::AllMiniLML12V2, 384),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
    ("bge-large-en-v1.5", EmbeddingModel::BGELargeENV15, 1024),
    ("nomic-embed-text-v1.5", EmbeddingModel::NomicEmbedTextV15, 768),
    ("multilingual-e5-small", EmbeddingModel::MultilingualE5Small, 384),
];

pub struct FastEmbedProvider {
    name: String,
    model_name: EmbeddingModel,
    dimension: usize,
    model: OnceCell<Arc<TextEmbedding>>,
}

impl FastEmbedProvider {
    /// Look up `model_name`. A configured dimension that differs from the
    /// model's is allowed; the adapter pads or truncates.
    pub fn from_config(model_name: &str, configured_dim: usize) -> Result<Self, EmbeddingError> {
        let (name, model, dimension) = KNOWN_MODELS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(model_name))
            .ok_or_else(|| {
                let supported: Vec<&str> = KNOWN_MODELS.iter().map(|(n, _, _)| *n).collect();
                EmbeddingError::ModelInit(format!(
                    "Unknown embedding model '{model_name}'. Supported: {}",
                    supported.join(", ")
                ))
            })?;

        if *dimension != configured_dim {
            warn!(
                model = name,
                native = dimension,
                configured = configured_dim,
                "Model dimension differs from configuration; vectors will be normalized"
            );
        }

        Ok(Self {
            name: format!("fastembed:{name}"),
            model_name: model.clone(),
            dimension: *dimension,
            model: OnceCell::new(),
        })
    }

    #[instrument(skip(self))]
    fn get_or_init_model(&self) -> Result<Arc<TextEmbedding>, EmbeddingError> {
        self.model
            .get_or_try_init(|| load_model(self.model_name.clone()).map(Arc::new))
            .cloned()
    }
}

fn load_model(model_name: EmbeddingModel) -> Result<TextEmbedding, EmbeddingError> {
    info!(model = ?model_name, "Loading embedding model");
    let mut options = InitOptions::new(model_name.clone());
    options.show_download_progress = false;
    let model =
        TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
    info!(model = ?model_name, "Embedding model loaded");
    Ok(model)
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        if self.model.get().is_some() {
            return Ok(());
        }
        // Model loading does file and network I/O.
        let model_name = self.model_name.clone();
        let loaded = task::spawn_blocking(move || load_model(model_name)).await??;
        // A concurrent loader may have won; either model is fine.
        let _ = self.model.set(Arc::new(loaded));
        Ok(())
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.get_or_init_model()?;
        let texts = texts.to_vec();

        let embeddings = task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))
        })
        .await??;

        debug!(
            batch_size = embeddings.len(),
            dimension = embeddings.first().map(|e| e.len()).unwrap_or(0),
            "Generated batch embeddings"
        );
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_known_and_unknown() {
        let provider = FastEmbedProvider::from_config("all-MiniLM-L6-v2", 384).unwrap();
        assert_eq!(provider.dimension(), 384);
        assert!(FastEmbedProvider::from_config("unknown-model", 384).is_err());
    }

    #[test]
    fn test_from_config_tolerates_dimension_difference() {
        let provider = FastEmbedProvider::from_config("bge-base-en-v1.5", 384).unwrap();
        assert_eq!(provider.dimension(), 768);
    }

    #[tokio::test]
    #[ignore = "Downloads model from network, slow"]
    async fn test_embed_produces_native_dimension() {
        let provider = FastEmbedProvider::from_config("all-MiniLM-L6-v2", 384).unwrap();
        provider.initialize().await.unwrap();
        let v = provider.embed("Hello, world!").await.unwrap();
        assert_eq!(v.len(), 384);
        assert!(v.iter().any(|&x| x != 0.0));
    }
}
