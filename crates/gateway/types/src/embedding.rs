//! Embedding records backing semantic discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityType;

/// One row per indexed entity, unique on `(entity_path, entity_type)`
/// within a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub entity_path: String,
    pub entity_type: EntityType,
    /// Fixed-dimension embedding of `text_blob`.
    pub vector: Vec<f32>,
    /// The normalized text that produced the vector.
    pub text_blob: String,
    /// blake3 hex digest of `text_blob`; compared on re-index instead of
    /// the full blob.
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    /// Storage key combining path and type, unique within a collection.
    pub fn key(entity_path: &str, entity_type: EntityType) -> String {
        format!("{}::{entity_path}", entity_type.as_str())
    }

    /// Fingerprint a normalized text blob.
    pub fn fingerprint_of(text_blob: &str) -> String {
        blake3::hash(text_blob.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_disambiguate_entity_types() {
        assert_ne!(
            EmbeddingRecord::key("/svc/a", EntityType::Server),
            EmbeddingRecord::key("/svc/a", EntityType::Agent)
        );
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(
            EmbeddingRecord::fingerprint_of("hello"),
            EmbeddingRecord::fingerprint_of("hello")
        );
        assert_ne!(
            EmbeddingRecord::fingerprint_of("hello"),
            EmbeddingRecord::fingerprint_of("hello world")
        );
    }
}
