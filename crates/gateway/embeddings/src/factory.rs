//! Construction of the configured embedder.

use std::sync::Arc;

use gateway_types::RegistryError;

use crate::config::{EmbeddingsConfig, EmbeddingsProvider};
use crate::remote::RemoteEmbedder;
use crate::traits::Embedder;

/// Build the embedder selected by the configuration.
///
/// Dimension mismatches surface here for the local provider (the model
/// declares its size at load); remote providers verify on first call.
pub fn build_embedder(config: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>, RegistryError> {
    if config.expected_dimension == 0 {
        return Err(RegistryError::Invalid(
            "embeddings.expected_dimension must be positive".to_string(),
        ));
    }
    match config.provider {
        EmbeddingsProvider::Local => build_local(config),
        EmbeddingsProvider::RemoteOpenaiCompatible
        | EmbeddingsProvider::RemoteCohere
        | EmbeddingsProvider::RemoteBedrock => {
            let embedder = RemoteEmbedder::new(config.clone()).map_err(RegistryError::from)?;
            Ok(Arc::new(embedder))
        }
    }
}

#[cfg(feature = "local-model")]
fn build_local(config: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>, RegistryError> {
    let embedder = crate::local::LocalEmbedder::load(config).map_err(RegistryError::from)?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "local-model"))]
fn build_local(_config: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>, RegistryError> {
    Err(RegistryError::Invalid(
        "embeddings.provider = local requires the `local-model` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_fails_at_startup() {
        let config = EmbeddingsConfig {
            provider: EmbeddingsProvider::RemoteOpenaiCompatible,
            model_name: "text-embedding-3-small".to_string(),
            expected_dimension: 0,
            api_base: None,
            api_key: Some("key".to_string()),
        };
        assert!(build_embedder(&config).is_err());
    }

    #[test]
    fn remote_provider_builds() {
        let config = EmbeddingsConfig {
            provider: EmbeddingsProvider::RemoteOpenaiCompatible,
            model_name: "text-embedding-3-small".to_string(),
            expected_dimension: 1536,
            api_base: None,
            api_key: Some("key".to_string()),
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 1536);
    }
}
