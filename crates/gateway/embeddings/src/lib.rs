//! Embedding producers for semantic discovery.
//!
//! An [`Embedder`] turns text into fixed-dimension float vectors. Providers:
//! - `local`: a BERT-family model run in-process via candle (feature
//!   `local-model`); CPU work is dispatched to the blocking pool.
//! - `remote-openai-compatible`, `remote-cohere`, `remote-bedrock`: HTTP
//!   providers authenticated with a bearer token.
//!
//! Every provider verifies the declared dimension; a mismatch fails the call
//! rather than warning.

// The local provider memory-maps model weights, so unlike the sibling
// crates this one cannot deny(unsafe_code) outright.
#![warn(rust_2018_idioms)]

mod config;
mod error;
mod factory;
#[cfg(feature = "local-model")]
pub mod local;
mod remote;
pub mod testing;
mod traits;

pub use config::{EmbeddingsConfig, EmbeddingsProvider};
pub use error::EmbeddingsError;
pub use factory::build_embedder;
pub use remote::RemoteEmbedder;
pub use traits::Embedder;
