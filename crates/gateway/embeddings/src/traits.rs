use async_trait::async_trait;

use crate::error::EmbeddingsError;

/// Producer of fixed-dimension vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Declared output dimension; every returned vector has this length.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingsError>;
}

/// Check a provider response against the declared dimension.
pub(crate) fn verify_dimension(
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingsError> {
    for vector in vectors {
        if vector.len() != expected {
            return Err(EmbeddingsError::Dimension {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}
