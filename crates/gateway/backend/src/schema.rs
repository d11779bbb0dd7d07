//! Collection schema declarations consumed by `ensure_schema`.

use serde::{Deserialize, Serialize};

/// Similarity metric for vector collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorMetric {
    Cosine,
}

/// Vector index declaration for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSpec {
    pub dimension: usize,
    pub metric: VectorMetric,
}

/// Secondary index on a top-level document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
}

/// Everything `ensure_schema` needs to prepare a collection. Idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<VectorSpec>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
            vector: None,
        }
    }

    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(IndexSpec {
            field: field.into(),
        });
        self
    }

    pub fn with_vector(mut self, dimension: usize) -> Self {
        self.vector = Some(VectorSpec {
            dimension,
            metric: VectorMetric::Cosine,
        });
        self
    }
}
