//! Shard management and startup rebuild.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use gateway_store::{EntityFilter, RegistryStore};
use gateway_embeddings::Embedder;
use gateway_types::{
    EmbeddingRecord, Entity, EntityType, Namespace, Registrable, RegistryError, RegistryResult,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::blob::{fingerprint, text_blob};
use crate::shard::{IndexEntry, IndexShard, SearchFilter, SearchHit};

/// Aggregate counters for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub shards: usize,
    pub entries: usize,
}

/// In-memory discovery index, concurrent readers and a single writer (the
/// synchronizer) applying updates in change-event order.
pub struct VectorIndex {
    dimension: usize,
    shards: RwLock<HashMap<(Namespace, EntityType), IndexShard>>,
    ready: AtomicBool,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            shards: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether the startup rebuild completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Rebuild every shard from the store, re-embedding entities whose
    /// stored fingerprint is missing or stale, then mark the index ready.
    pub async fn rebuild(
        &self,
        store: &RegistryStore,
        embedder: &dyn Embedder,
        namespaces: &[Namespace],
    ) -> RegistryResult<()> {
        for namespace in namespaces {
            for entity_type in [EntityType::Server, EntityType::Agent] {
                let entities = store
                    .list_entities(namespace, entity_type, &EntityFilter::default(), None, 0)
                    .await?;
                let records = store.list_embeddings(namespace, Some(entity_type)).await?;
                let mut by_path: HashMap<String, EmbeddingRecord> = records
                    .into_iter()
                    .map(|r| (r.entity_path.clone(), r))
                    .collect();

                for entity in entities {
                    let reg = entity.as_registrable();
                    let blob = text_blob(reg);
                    let print = fingerprint(&blob);
                    let record = by_path.remove(reg.path());

                    let vector = match record {
                        Some(record) if record.fingerprint == print => record.vector,
                        stale => {
                            // Heal missing or out-of-date embeddings; a
                            // provider outage here skips the entity rather
                            // than failing startup.
                            match self
                                .reembed(store, embedder, namespace, &entity, &blob, &print)
                                .await
                            {
                                Ok(vector) => vector,
                                Err(e) => {
                                    warn!(
                                        path = reg.path(),
                                        stale = stale.is_some(),
                                        error = %e,
                                        "skipping entity during index rebuild"
                                    );
                                    continue;
                                }
                            }
                        }
                    };

                    self.upsert(
                        namespace,
                        entity_type,
                        IndexEntry {
                            path: reg.path().to_string(),
                            vector,
                            updated_at: reg.updated_at(),
                            enabled: reg.is_enabled(),
                            tags: reg.tags().iter().cloned().collect(),
                        },
                    )
                    .await?;
                }
            }
        }
        self.ready.store(true, Ordering::Release);
        let stats = self.stats().await;
        info!(shards = stats.shards, entries = stats.entries, "vector index ready");
        Ok(())
    }

    async fn reembed(
        &self,
        store: &RegistryStore,
        embedder: &dyn Embedder,
        namespace: &Namespace,
        entity: &Entity,
        blob: &str,
        print: &str,
    ) -> RegistryResult<Vec<f32>> {
        let mut vectors = embedder
            .embed(&[blob.to_string()])
            .await
            .map_err(RegistryError::from)?;
        let vector = vectors
            .pop()
            .ok_or_else(|| RegistryError::EmbeddingsFailed {
                transient: false,
                message: "provider returned no vector".to_string(),
            })?;
        store
            .put_embedding(
                namespace,
                EmbeddingRecord {
                    entity_path: entity.path().to_string(),
                    entity_type: entity.entity_type(),
                    vector: vector.clone(),
                    text_blob: blob.to_string(),
                    fingerprint: print.to_string(),
                    updated_at: Utc::now(),
                },
            )
            .await?;
        Ok(vector)
    }

    pub async fn upsert(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        entry: IndexEntry,
    ) -> RegistryResult<()> {
        if entry.vector.len() != self.dimension {
            return Err(RegistryError::Invalid(format!(
                "vector dimension {} does not match index dimension {}",
                entry.vector.len(),
                self.dimension
            )));
        }
        let mut shards = self.shards.write().await;
        shards
            .entry((namespace.clone(), entity_type))
            .or_default()
            .upsert(entry);
        Ok(())
    }

    pub async fn remove(&self, namespace: &Namespace, entity_type: EntityType, path: &str) {
        let mut shards = self.shards.write().await;
        if let Some(shard) = shards.get_mut(&(namespace.clone(), entity_type)) {
            shard.remove(path);
        }
    }

    pub async fn set_enabled(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        enabled: bool,
        updated_at: DateTime<Utc>,
    ) {
        let mut shards = self.shards.write().await;
        if let Some(shard) = shards.get_mut(&(namespace.clone(), entity_type)) {
            shard.set_enabled(path, enabled, updated_at);
        }
    }

    pub async fn contains(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
    ) -> bool {
        let shards = self.shards.read().await;
        shards
            .get(&(namespace.clone(), entity_type))
            .map(|shard| shard.contains(path))
            .unwrap_or(false)
    }

    /// Tenant-scoped top-k.
    pub async fn search(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Vec<SearchHit> {
        let shards = self.shards.read().await;
        shards
            .get(&(namespace.clone(), entity_type))
            .map(|shard| shard.search(query, k, filter))
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> IndexStats {
        let shards = self.shards.read().await;
        IndexStats {
            shards: shards.len(),
            entries: shards.values().map(IndexShard::len).sum(),
        }
    }
}
