use serde::{Deserialize, Serialize};

/// Which embedding implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingsProvider {
    /// In-process model (feature `local-model`).
    Local,
    /// Any service speaking the OpenAI embeddings API.
    RemoteOpenaiCompatible,
    RemoteCohere,
    /// Bedrock runtime HTTP API with an API-key bearer token.
    RemoteBedrock,
}

/// Embeddings configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingsProvider,
    /// Model identifier: a HuggingFace repo for `local`, the provider's
    /// model name otherwise.
    pub model_name: String,
    /// Declared output dimension; verified on every call.
    pub expected_dimension: usize,
    /// Base URL override, e.g. to route through a shared proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Bearer credential for remote providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl EmbeddingsConfig {
    /// Default base URL for the configured remote provider.
    pub fn effective_api_base(&self) -> Option<String> {
        if let Some(base) = &self.api_base {
            return Some(base.trim_end_matches('/').to_string());
        }
        match self.provider {
            EmbeddingsProvider::Local => None,
            EmbeddingsProvider::RemoteOpenaiCompatible => {
                Some("https://api.openai.com/v1".to_string())
            }
            EmbeddingsProvider::RemoteCohere => Some("https://api.cohere.com/v1".to_string()),
            // Bedrock has no sensible default: the endpoint is regional.
            EmbeddingsProvider::RemoteBedrock => None,
        }
    }
}
