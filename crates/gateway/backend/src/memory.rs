//! In-memory reference backend.
//!
//! This adapter is deterministic and test-friendly, and doubles as the
//! client-side fallback vector search path: similarity is computed exactly
//! over every document in the collection.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::filter::Filter;
use crate::schema::CollectionSpec;
use crate::traits::{apply_projection, ListOptions, RegistryBackend, SortOrder, VectorHit};
use crate::{BackendError, BackendResult};

#[derive(Default)]
struct Collection {
    spec: Option<CollectionSpec>,
    docs: BTreeMap<String, Value>,
}

/// In-memory backend adapter.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(
        &self,
    ) -> BackendResult<std::sync::RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| BackendError::Unavailable("collections lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> BackendResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| BackendError::Unavailable("collections lock poisoned".to_string()))
    }
}

#[async_trait]
impl RegistryBackend for MemoryBackend {
    async fn ensure_schema(&self, spec: &CollectionSpec) -> BackendResult<()> {
        let mut guard = self.write()?;
        let collection = guard.entry(spec.name.clone()).or_default();
        if let (Some(existing), Some(wanted)) = (
            collection.spec.as_ref().and_then(|s| s.vector),
            spec.vector,
        ) {
            if existing.dimension != wanted.dimension {
                return Err(BackendError::Invalid(format!(
                    "collection `{}` already declared with dimension {}, requested {}",
                    spec.name, existing.dimension, wanted.dimension
                )));
            }
        }
        collection.spec = Some(spec.clone());
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> BackendResult<Option<Value>> {
        let guard = self.read()?;
        Ok(guard
            .get(collection)
            .and_then(|c| c.docs.get(key))
            .cloned())
    }

    async fn insert(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()> {
        let mut guard = self.write()?;
        let collection = guard.entry(collection.to_string()).or_default();
        if collection.docs.contains_key(key) {
            return Err(BackendError::Conflict(format!("key `{key}` already exists")));
        }
        collection.docs.insert(key.to_string(), doc);
        Ok(())
    }

    async fn put(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()> {
        let mut guard = self.write()?;
        let collection = guard.entry(collection.to_string()).or_default();
        collection.docs.insert(key.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> BackendResult<bool> {
        let mut guard = self.write()?;
        Ok(guard
            .get_mut(collection)
            .map(|c| c.docs.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list(
        &self,
        collection: &str,
        filter: &Filter,
        options: &ListOptions,
    ) -> BackendResult<Vec<Value>> {
        let guard = self.read()?;
        let mut docs: Vec<Value> = match guard.get(collection) {
            Some(c) => c
                .docs
                .values()
                .filter(|doc| filter.matches(doc))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        drop(guard);

        if let Some(sort) = &options.sort {
            docs.sort_by(|a, b| {
                let ordering = cmp_json(a.get(&sort.field), b.get(&sort.field));
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        let iter = docs.into_iter().skip(options.offset);
        let docs: Vec<Value> = match options.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        };

        Ok(docs
            .into_iter()
            .map(|doc| apply_projection(doc, &options.projection))
            .collect())
    }

    async fn vector_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: &Filter,
    ) -> BackendResult<Vec<VectorHit>> {
        if query.is_empty() {
            return Err(BackendError::Invalid(
                "query vector must not be empty".to_string(),
            ));
        }

        let guard = self.read()?;
        let mut hits = match guard.get(collection) {
            Some(c) => c
                .docs
                .iter()
                .filter(|(_, doc)| filter.matches(doc))
                .filter_map(|(key, doc)| {
                    let vector = doc.get("vector")?.as_array()?;
                    let vector: Vec<f32> = vector
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect();
                    cosine_similarity(query, &vector).map(|score| VectorHit {
                        key: key.clone(),
                        score,
                    })
                })
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };
        drop(guard);

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

fn cmp_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        },
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_rejects_duplicate_keys() {
        let backend = MemoryBackend::new();
        backend
            .insert("c", "k", json!({"a": 1}))
            .await
            .unwrap();
        let err = backend.insert("c", "k", json!({"a": 2})).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
    }

    #[tokio::test]
    async fn put_upserts_and_delete_reports_existence() {
        let backend = MemoryBackend::new();
        backend.put("c", "k", json!({"a": 1})).await.unwrap();
        backend.put("c", "k", json!({"a": 2})).await.unwrap();
        assert_eq!(
            backend.get("c", "k").await.unwrap(),
            Some(json!({"a": 2}))
        );
        assert!(backend.delete("c", "k").await.unwrap());
        assert!(!backend.delete("c", "k").await.unwrap());
    }

    #[tokio::test]
    async fn list_sorts_and_pages() {
        let backend = MemoryBackend::new();
        for (key, at) in [("a", "2024-01-01T00:00:00Z"), ("b", "2024-02-01T00:00:00Z")] {
            backend
                .put("c", key, json!({"key": key, "updated_at": at}))
                .await
                .unwrap();
        }
        let options = ListOptions {
            sort: Some(crate::SortSpec::descending("updated_at")),
            limit: Some(1),
            ..Default::default()
        };
        let docs = backend.list("c", &Filter::all(), &options).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["key"], "b");
    }

    #[tokio::test]
    async fn projection_strips_documents_to_listed_keys() {
        let backend = MemoryBackend::new();
        backend
            .put("c", "k", json!({"path": "/svc/a", "name": "a", "tools": [1, 2]}))
            .await
            .unwrap();
        let options = ListOptions {
            projection: Some(vec!["path".to_string(), "name".to_string()]),
            ..Default::default()
        };
        let docs = backend.list("c", &Filter::all(), &options).await.unwrap();
        assert_eq!(docs, vec![json!({"path": "/svc/a", "name": "a"})]);
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let backend = MemoryBackend::new();
        backend
            .put("v", "close", json!({"vector": [1.0, 0.0, 0.0]}))
            .await
            .unwrap();
        backend
            .put("v", "far", json!({"vector": [0.0, 1.0, 0.0]}))
            .await
            .unwrap();
        let hits = backend
            .vector_search("v", &[0.9, 0.1, 0.0], 1, &Filter::all())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "close");
    }

    #[tokio::test]
    async fn ensure_schema_rejects_dimension_change() {
        let backend = MemoryBackend::new();
        backend
            .ensure_schema(&CollectionSpec::new("v").with_vector(3))
            .await
            .unwrap();
        backend
            .ensure_schema(&CollectionSpec::new("v").with_vector(3))
            .await
            .unwrap();
        let err = backend
            .ensure_schema(&CollectionSpec::new("v").with_vector(4))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Invalid(_)));
    }
}
