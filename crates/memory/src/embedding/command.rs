//! Embeddings from an external program.
//!
//! The program is invoked as `program [args...] <json texts> <model> <dim>`
//! and must print a JSON array of vectors, one per input text.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{is_zero_vector, EmbeddingError, EmbeddingProvider};

pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
    model: String,
    dimension: usize,
}

impl CommandEmbedder {
    pub fn new(program: String, args: Vec<String>, model: String, dimension: usize) -> Self {
        Self {
            program,
            args,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CommandEmbedder {
    fn name(&self) -> &str {
        &self.program
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let payload = serde_json::to_string(texts)
            .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        debug!(program = %self.program, batch_size = texts.len(), "Running embedding command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(payload)
            .arg(&self.model)
            .arg(self.dimension.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                EmbeddingError::BackendUnavailable(format!(
                    "failed to spawn '{}': {e}",
                    self.program
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                program = %self.program,
                exit_code = ?output.status.code(),
                stderr = %stderr.trim(),
                "Embedding command failed"
            );
            return Err(EmbeddingError::BackendUnavailable(format!(
                "'{}' exited with {:?}",
                self.program,
                output.status.code()
            )));
        }

        let vectors: Vec<Vec<f32>> = serde_json::from_slice(&output.stdout).map_err(|e| {
            EmbeddingError::BackendUnavailable(format!(
                "'{}' printed invalid JSON: {e}",
                self.program
            ))
        })?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "'{}' returned {} vectors for {} texts",
                self.program,
                vectors.len(),
                texts.len()
            )));
        }
        if vectors.iter().all(|v| is_zero_vector(v)) {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "'{}' returned only zero vectors",
                self.program
            )));
        }
        Ok(vectors)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandEmbedder {
        CommandEmbedder::new(
            "sh".into(),
            vec!["-c".into(), script.into(), "embedder".into()],
            "test-model".into(),
            3,
        )
    }

    #[tokio::test]
    async fn test_parses_vectors_from_stdout() {
        let embedder = shell("printf '[[1.0, 0.0, 0.5]]'");
        let v = embedder.embed("hello").await.unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.5]);
    }

    #[tokio::test]
    async fn test_receives_model_and_dimension() {
        // $1 is the JSON texts, $2 the model, $3 the dimension.
        let embedder = shell(r#"[ "$2" = test-model ] && [ "$3" = 3 ] && printf '[[0.1,0.2,0.3]]'"#);
        assert!(embedder.embed("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_unavailable() {
        let err = shell("exit 3").embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_unavailable() {
        let err = shell("echo not-json").embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_zero_vectors_are_unavailable() {
        let err = shell("printf '[[0,0,0]]'").embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::BackendUnavailable(_)));
    }
}
