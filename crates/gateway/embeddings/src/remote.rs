//! Remote HTTP embedding providers.
//!
//! One client covers the three wire dialects; construction picks the request
//! shape from the configured provider. All of them authenticate with a
//! bearer token. HTTP 429 and 5xx map to transient failures, other non-2xx
//! to permanent ones.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::{EmbeddingsConfig, EmbeddingsProvider};
use crate::error::EmbeddingsError;
use crate::traits::{verify_dimension, Embedder};

/// HTTP-backed embedder.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    config: EmbeddingsConfig,
    api_base: String,
}

impl RemoteEmbedder {
    pub fn new(config: EmbeddingsConfig) -> Result<Self, EmbeddingsError> {
        if config.provider == EmbeddingsProvider::Local {
            return Err(EmbeddingsError::Permanent(
                "local provider cannot be constructed as a remote embedder".to_string(),
            ));
        }
        let api_base = config.effective_api_base().ok_or_else(|| {
            EmbeddingsError::Permanent(format!(
                "provider {:?} requires an explicit api_base",
                config.provider
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingsError::Permanent(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            api_base,
        })
    }

    fn bearer(&self) -> Result<&str, EmbeddingsError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingsError::Permanent("missing api_key".to_string()))
    }

    async fn post_json(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, EmbeddingsError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingsError::Transient(format!("request to {url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(EmbeddingsError::Transient(format!(
                "{url} returned {status}"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbeddingsError::Permanent(format!(
                "{url} returned {status}: {detail}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| EmbeddingsError::Permanent(format!("malformed response from {url}: {e}")))
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingsError> {
        #[derive(Deserialize)]
        struct Item {
            index: usize,
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct Response {
            data: Vec<Item>,
        }

        let url = format!("{}/embeddings", self.api_base);
        let body = json!({
            "model": self.config.model_name,
            "input": texts,
        });
        let raw = self.post_json(&url, body).await?;
        let parsed: Response = serde_json::from_value(raw)
            .map_err(|e| EmbeddingsError::Permanent(format!("unexpected response shape: {e}")))?;

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    async fn embed_cohere(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingsError> {
        #[derive(Deserialize)]
        struct Response {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/embed", self.api_base);
        let body = json!({
            "model": self.config.model_name,
            "texts": texts,
            "input_type": "search_document",
        });
        let raw = self.post_json(&url, body).await?;
        let parsed: Response = serde_json::from_value(raw)
            .map_err(|e| EmbeddingsError::Permanent(format!("unexpected response shape: {e}")))?;
        Ok(parsed.embeddings)
    }

    /// Bedrock's invoke API embeds one text per call; the batch loops.
    async fn embed_bedrock(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingsError> {
        #[derive(Deserialize)]
        struct Response {
            embedding: Vec<f32>,
        }

        let url = format!("{}/model/{}/invoke", self.api_base, self.config.model_name);
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let raw = self.post_json(&url, json!({ "inputText": text })).await?;
            let parsed: Response = serde_json::from_value(raw).map_err(|e| {
                EmbeddingsError::Permanent(format!("unexpected response shape: {e}"))
            })?;
            vectors.push(parsed.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.config.expected_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingsError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = ?self.config.provider,
            batch = texts.len(),
            "embedding batch"
        );

        let vectors = match self.config.provider {
            EmbeddingsProvider::RemoteOpenaiCompatible => self.embed_openai(texts).await?,
            EmbeddingsProvider::RemoteCohere => self.embed_cohere(texts).await?,
            EmbeddingsProvider::RemoteBedrock => self.embed_bedrock(texts).await?,
            EmbeddingsProvider::Local => unreachable!("checked at construction"),
        };

        if vectors.len() != texts.len() {
            return Err(EmbeddingsError::Permanent(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        verify_dimension(self.config.expected_dimension, &vectors)?;
        Ok(vectors)
    }
}
