use async_trait::async_trait;
use serde_json::Value;

use crate::filter::Filter;
use crate::schema::CollectionSpec;
use crate::BackendResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Sort directive over a top-level document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Paging, sorting, and projection for listings.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// When set, returned documents are stripped to these top-level keys.
    pub projection: Option<Vec<String>>,
}

/// One vector-search result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub key: String,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub score: f32,
}

/// Narrow persistence contract implemented by every backend.
///
/// Documents are opaque JSON objects. Vector collections keep the embedding
/// under the top-level `vector` key; backends may additionally materialize it
/// into native storage for ANN.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Create the collection and its indexes. Idempotent.
    async fn ensure_schema(&self, spec: &CollectionSpec) -> BackendResult<()>;

    async fn get(&self, collection: &str, key: &str) -> BackendResult<Option<Value>>;

    /// Insert a new document; fails with `Conflict` when the key exists.
    async fn insert(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()>;

    /// Upsert a document.
    async fn put(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()>;

    /// Delete by key; returns whether the document existed.
    async fn delete(&self, collection: &str, key: &str) -> BackendResult<bool>;

    async fn list(
        &self,
        collection: &str,
        filter: &Filter,
        options: &ListOptions,
    ) -> BackendResult<Vec<Value>>;

    /// Cosine top-k over the collection's vectors.
    async fn vector_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: &Filter,
    ) -> BackendResult<Vec<VectorHit>>;
}

/// Strip a document to the projected top-level keys.
pub(crate) fn apply_projection(doc: Value, projection: &Option<Vec<String>>) -> Value {
    match projection {
        None => doc,
        Some(fields) => {
            let mut out = serde_json::Map::new();
            if let Value::Object(map) = doc {
                for field in fields {
                    if let Some(value) = map.get(field) {
                        out.insert(field.clone(), value.clone());
                    }
                }
            }
            Value::Object(out)
        }
    }
}
