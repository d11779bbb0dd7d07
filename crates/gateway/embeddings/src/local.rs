//! In-process embedding with a BERT-family sentence encoder.
//!
//! Loads config, tokenizer, and safetensors weights from the HuggingFace hub
//! cache (or a local directory) at startup. Inference is CPU-bound, so every
//! batch runs under `spawn_blocking` to keep the async scheduler responsive.
//!
//! Pooling is CLS-token with L2 normalization, matching retrieval-tuned
//! models like bge-small-en-v1.5.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::EmbeddingsConfig;
use crate::error::EmbeddingsError;
use crate::traits::Embedder;

/// Files an encoder needs on disk.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// Synchronous encoder; wrapped in [`LocalEmbedder`] for async use.
struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl BertEncoder {
    fn load(files: &ModelFiles, expected_dimension: usize) -> Result<Self, EmbeddingsError> {
        let device = Device::Cpu;

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&files.config)
                .map_err(|e| EmbeddingsError::Permanent(format!("read config.json: {e}")))?,
        )
        .map_err(|e| EmbeddingsError::Permanent(format!("parse config.json: {e}")))?;

        if config.hidden_size != expected_dimension {
            return Err(EmbeddingsError::Dimension {
                expected: expected_dimension,
                actual: config.hidden_size,
            });
        }

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| EmbeddingsError::Permanent(format!("load tokenizer: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights.clone()], DTYPE, &device)
                .map_err(|e| EmbeddingsError::Permanent(format!("load weights: {e}")))?
        };
        let dimension = config.hidden_size;
        let model = BertModel::load(vb, &config)
            .map_err(|e| EmbeddingsError::Permanent(format!("build model: {e}")))?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    /// Batch forward pass with CLS pooling and L2 normalization.
    fn forward_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingsError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| EmbeddingsError::Permanent(format!("tokenization failed: {e}")))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut all_input_ids = Vec::new();
        let mut all_attention_mask = Vec::new();
        let mut all_token_type_ids = Vec::new();
        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut attention = encoding.get_attention_mask().to_vec();
            let mut type_ids = encoding.get_type_ids().to_vec();
            ids.resize(max_len, 0);
            attention.resize(max_len, 0);
            type_ids.resize(max_len, 0);
            all_input_ids.extend(ids);
            all_attention_mask.extend(attention);
            all_token_type_ids.extend(type_ids);
        }

        let batch_size = texts.len();
        let result = (|| -> candle_core::Result<Vec<Vec<f32>>> {
            let input_ids =
                Tensor::from_vec(all_input_ids, (batch_size, max_len), &self.device)?
                    .to_dtype(DType::U32)?;
            let attention_mask =
                Tensor::from_vec(all_attention_mask, (batch_size, max_len), &self.device)?;
            let token_type_ids =
                Tensor::from_vec(all_token_type_ids, (batch_size, max_len), &self.device)?
                    .to_dtype(DType::U32)?;

            let output = self
                .model
                .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

            // CLS pooling: position 0 of each sequence.
            let cls = output.narrow(1, 0, 1)?.squeeze(1)?;
            let norm = cls.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
            let normalized = cls.broadcast_div(&norm)?;
            normalized.to_vec2::<f32>()
        })();

        result.map_err(|e| EmbeddingsError::Permanent(format!("forward pass failed: {e}")))
    }
}

/// Async wrapper dispatching encoder work to the blocking pool.
pub struct LocalEmbedder {
    encoder: Arc<BertEncoder>,
    model_name: String,
}

impl LocalEmbedder {
    /// Load the model named in the configuration from the HuggingFace hub
    /// (cached under `~/.cache/huggingface`) or, when `model_name` is an
    /// existing directory, from disk.
    pub fn load(config: &EmbeddingsConfig) -> Result<Self, EmbeddingsError> {
        info!(model = %config.model_name, "loading local embedding model");
        let files = if Path::new(&config.model_name).is_dir() {
            let dir = Path::new(&config.model_name);
            ModelFiles {
                config: dir.join("config.json"),
                tokenizer: dir.join("tokenizer.json"),
                weights: dir.join("model.safetensors"),
            }
        } else {
            Self::fetch_from_hub(&config.model_name)?
        };

        let encoder = BertEncoder::load(&files, config.expected_dimension)?;
        debug!(dimension = encoder.dimension, "local embedding model ready");
        Ok(Self {
            encoder: Arc::new(encoder),
            model_name: config.model_name.clone(),
        })
    }

    fn fetch_from_hub(model_name: &str) -> Result<ModelFiles, EmbeddingsError> {
        let api = Api::new()
            .map_err(|e| EmbeddingsError::Transient(format!("hub client: {e}")))?;
        let repo = api.repo(Repo::new(model_name.to_string(), RepoType::Model));
        let fetch = |file: &str| {
            repo.get(file)
                .map_err(|e| EmbeddingsError::Transient(format!("fetch {file}: {e}")))
        };
        Ok(ModelFiles {
            config: fetch("config.json")?,
            tokenizer: fetch("tokenizer.json")?,
            weights: fetch("model.safetensors")?,
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        self.encoder.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingsError> {
        let encoder = Arc::clone(&self.encoder);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || encoder.forward_batch(&texts))
            .await
            .map_err(|e| EmbeddingsError::Permanent(format!("blocking task failed: {e}")))?
    }
}
