use gateway_types::RegistryError;
use thiserror::Error;

/// Embedding-provider errors, split by whether a retry can help.
#[derive(Debug, Error)]
pub enum EmbeddingsError {
    /// Worth retrying with backoff (timeouts, 429s, 5xx).
    #[error("transient embeddings failure: {0}")]
    Transient(String),

    /// Retrying will not help (bad credentials, unsupported model, 4xx).
    #[error("embeddings failure: {0}")]
    Permanent(String),

    /// Model output does not match the declared dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

impl EmbeddingsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingsError::Transient(_))
    }
}

impl From<EmbeddingsError> for RegistryError {
    fn from(err: EmbeddingsError) -> Self {
        RegistryError::EmbeddingsFailed {
            transient: err.is_transient(),
            message: err.to_string(),
        }
    }
}
