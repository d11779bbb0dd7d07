use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use gateway_backend::{
    BackendError, CollectionSpec, Filter, ListOptions, RegistryBackend, SortSpec,
};
use gateway_types::{
    ChangeEvent, ChangeOp, EmbeddingRecord, Entity, EntityType, HealthRecord, Namespace,
    RegistryError, RegistryResult, ScanId, ScopeRecord, SecurityScanRecord,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::collections::Collections;
use crate::locks::KeyedLocks;
use crate::pager::EntityPager;

/// Filters accepted by entity listings.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub tags: Vec<String>,
    pub enabled_only: bool,
}

impl EntityFilter {
    fn to_backend(&self) -> Filter {
        let mut filters = Vec::new();
        if self.enabled_only {
            filters.push(Filter::eq("is_enabled", true));
        }
        for tag in &self.tags {
            filters.push(Filter::contains("tags", tag.clone()));
        }
        if filters.is_empty() {
            Filter::all()
        } else {
            Filter::And(filters)
        }
    }
}

/// Notification that a scope record changed, consumed by the policy reloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChange {
    pub namespace: Namespace,
    pub name: String,
}

/// Typed store over the backend driver.
pub struct RegistryStore {
    backend: Arc<dyn RegistryBackend>,
    vector_dimension: usize,
    events: broadcast::Sender<ChangeEvent>,
    scope_events: broadcast::Sender<ScopeChange>,
    /// Guards seq increment + send so subscribers observe events in seq order.
    publish: Mutex<()>,
    seq: AtomicU64,
    namespaces: Mutex<BTreeSet<Namespace>>,
    /// Per-path write serialization, shared by orchestrator mutations and
    /// supervisor health writebacks.
    locks: KeyedLocks,
}

impl RegistryStore {
    /// Create a store publishing change events on a channel of the given
    /// capacity.
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        vector_dimension: usize,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (scope_events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            backend,
            vector_dimension,
            events,
            scope_events,
            publish: Mutex::new(()),
            seq: AtomicU64::new(0),
            namespaces: Mutex::new(BTreeSet::new()),
            locks: KeyedLocks::new(1024),
        }
    }

    /// Acquire the write lock for one entity path. Mutating operations of
    /// the orchestrator take this before calling into the store; the health
    /// writeback takes it internally.
    pub async fn lock_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        self.locks
            .lock(&format!("{namespace}/{entity_type}{path}"))
            .await
    }

    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    /// Subscribe to registrable change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Subscribe to scope-record change notifications.
    pub fn subscribe_scopes(&self) -> broadcast::Receiver<ScopeChange> {
        self.scope_events.subscribe()
    }

    /// Sequence number of the most recently published change event.
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Create collections and indexes for a namespace. Idempotent.
    pub async fn ensure_namespace(&self, namespace: &Namespace) -> RegistryResult<()> {
        let collections = Collections::new(namespace.clone());
        for entity_type in [EntityType::Server, EntityType::Agent] {
            self.backend
                .ensure_schema(
                    &CollectionSpec::new(collections.registrables(entity_type))
                        .with_index("is_enabled")
                        .with_index("tags")
                        .with_index("updated_at"),
                )
                .await
                .map_err(map_backend)?;
        }
        self.backend
            .ensure_schema(&CollectionSpec::new(collections.scopes()))
            .await
            .map_err(map_backend)?;
        self.backend
            .ensure_schema(
                &CollectionSpec::new(collections.scans())
                    .with_index("entity_path")
                    .with_index("status"),
            )
            .await
            .map_err(map_backend)?;
        self.backend
            .ensure_schema(
                &CollectionSpec::new(collections.embeddings(self.vector_dimension))
                    .with_vector(self.vector_dimension),
            )
            .await
            .map_err(map_backend)?;

        self.namespaces
            .lock()
            .map_err(|_| RegistryError::BackendUnavailable("namespace lock poisoned".into()))?
            .insert(namespace.clone());
        Ok(())
    }

    /// Namespaces this store has prepared.
    pub fn list_namespaces(&self) -> Vec<Namespace> {
        self.namespaces
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ---- registrables ----------------------------------------------------

    /// Insert a new entity. Fails with `Conflict` when the path is taken.
    pub async fn create_entity(
        &self,
        namespace: &Namespace,
        mut entity: Entity,
    ) -> RegistryResult<Entity> {
        entity.validate()?;
        let now = Utc::now();
        match &mut entity {
            Entity::Server(s) => {
                s.created_at = now;
                s.updated_at = now;
            }
            Entity::Agent(a) => {
                a.created_at = now;
                a.updated_at = now;
            }
        }

        let collection = Collections::new(namespace.clone()).registrables(entity.entity_type());
        let doc = to_doc(&entity)?;
        self.backend
            .insert(&collection, entity.path(), doc)
            .await
            .map_err(|e| match e {
                BackendError::Conflict(_) => RegistryError::Conflict(format!(
                    "{} `{}` already exists",
                    entity.entity_type(),
                    entity.path()
                )),
                other => map_backend(other),
            })?;

        self.publish_change(namespace, ChangeOp::Created, entity.clone());
        Ok(entity)
    }

    pub async fn get_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
    ) -> RegistryResult<Entity> {
        let collection = Collections::new(namespace.clone()).registrables(entity_type);
        let doc = self
            .backend
            .get(&collection, path)
            .await
            .map_err(map_backend)?
            .ok_or_else(|| RegistryError::NotFound(format!("{entity_type} `{path}`")))?;
        from_doc(doc)
    }

    /// Replace an entity. The path is immutable; `created_at` is preserved.
    pub async fn update_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        mut entity: Entity,
    ) -> RegistryResult<Entity> {
        if entity.path() != path {
            return Err(RegistryError::Invalid(format!(
                "path is immutable: `{}` != `{path}`",
                entity.path()
            )));
        }
        if entity.entity_type() != entity_type {
            return Err(RegistryError::Invalid("entity type mismatch".into()));
        }
        entity.validate()?;

        let existing = self.get_entity(namespace, entity_type, path).await?;
        let created_at = match &existing {
            Entity::Server(s) => s.created_at,
            Entity::Agent(a) => a.created_at,
        };
        match &mut entity {
            Entity::Server(s) => s.created_at = created_at,
            Entity::Agent(a) => a.created_at = created_at,
        }
        entity.touch(Utc::now());

        let collection = Collections::new(namespace.clone()).registrables(entity_type);
        self.backend
            .put(&collection, path, to_doc(&entity)?)
            .await
            .map_err(map_backend)?;

        self.publish_change(namespace, ChangeOp::Updated, entity.clone());
        Ok(entity)
    }

    /// Delete an entity and return its last snapshot.
    ///
    /// Scan records are retained for audit; embedding cleanup belongs to the
    /// index synchronizer, probe cancellation to the supervisor - both react
    /// to the `Deleted` event.
    pub async fn delete_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
    ) -> RegistryResult<Entity> {
        let snapshot = self.get_entity(namespace, entity_type, path).await?;
        let collection = Collections::new(namespace.clone()).registrables(entity_type);
        let existed = self
            .backend
            .delete(&collection, path)
            .await
            .map_err(map_backend)?;
        if !existed {
            return Err(RegistryError::NotFound(format!("{entity_type} `{path}`")));
        }
        self.publish_change(namespace, ChangeOp::Deleted, snapshot.clone());
        Ok(snapshot)
    }

    /// Set `is_enabled`, returning the new state. Idempotent: repeating the
    /// same toggle neither rewrites the entity nor emits an event.
    pub async fn toggle_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        enabled: bool,
    ) -> RegistryResult<Entity> {
        let mut entity = self.get_entity(namespace, entity_type, path).await?;
        if entity.is_enabled() == enabled {
            return Ok(entity);
        }
        entity.set_enabled(enabled);
        entity.touch(Utc::now());

        let collection = Collections::new(namespace.clone()).registrables(entity_type);
        self.backend
            .put(&collection, path, to_doc(&entity)?)
            .await
            .map_err(map_backend)?;

        self.publish_change(namespace, ChangeOp::Toggled, entity.clone());
        Ok(entity)
    }

    /// List entities sorted by `updated_at` descending.
    pub async fn list_entities(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        filter: &EntityFilter,
        limit: Option<usize>,
        offset: usize,
    ) -> RegistryResult<Vec<Entity>> {
        let collection = Collections::new(namespace.clone()).registrables(entity_type);
        let options = ListOptions {
            sort: Some(SortSpec::descending("updated_at")),
            limit,
            offset,
            projection: None,
        };
        let docs = self
            .backend
            .list(&collection, &filter.to_backend(), &options)
            .await
            .map_err(map_backend)?;
        docs.into_iter().map(from_doc).collect()
    }

    /// Restartable pager over a listing (lazy ordered sequence).
    pub fn page_entities(
        self: &Arc<Self>,
        namespace: Namespace,
        entity_type: EntityType,
        filter: EntityFilter,
        page_size: usize,
    ) -> EntityPager {
        EntityPager::new(Arc::clone(self), namespace, entity_type, filter, page_size)
    }

    pub async fn find_by_tag(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        tag: &str,
    ) -> RegistryResult<Vec<Entity>> {
        let filter = EntityFilter {
            tags: vec![tag.to_string()],
            enabled_only: false,
        };
        self.list_entities(namespace, entity_type, &filter, None, 0)
            .await
    }

    /// Write the health subrecord without emitting a change event.
    ///
    /// Health writebacks are supervisor-internal state, not registry
    /// mutations; publishing them would put the supervisor in its own
    /// subscription loop. The read-modify-write runs under the entity's
    /// write lock so it cannot clobber a concurrent update.
    pub async fn write_health(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        health: HealthRecord,
    ) -> RegistryResult<()> {
        let _guard = self.lock_entity(namespace, entity_type, path).await;
        let mut entity = self.get_entity(namespace, entity_type, path).await?;
        entity.set_health(Some(health));
        let collection = Collections::new(namespace.clone()).registrables(entity_type);
        self.backend
            .put(&collection, path, to_doc(&entity)?)
            .await
            .map_err(map_backend)
    }

    // ---- scopes ----------------------------------------------------------

    pub async fn put_scope(
        &self,
        namespace: &Namespace,
        scope: ScopeRecord,
    ) -> RegistryResult<ScopeRecord> {
        if scope.name.trim().is_empty() {
            return Err(RegistryError::Invalid("scope name must not be empty".into()));
        }
        let collection = Collections::new(namespace.clone()).scopes();
        let doc = serde_json::to_value(&scope)
            .map_err(|e| RegistryError::Invalid(format!("scope serialization: {e}")))?;
        self.backend
            .put(&collection, &scope.name, doc)
            .await
            .map_err(map_backend)?;
        let _ = self.scope_events.send(ScopeChange {
            namespace: namespace.clone(),
            name: scope.name.clone(),
        });
        Ok(scope)
    }

    pub async fn get_scope(
        &self,
        namespace: &Namespace,
        name: &str,
    ) -> RegistryResult<ScopeRecord> {
        let collection = Collections::new(namespace.clone()).scopes();
        let doc = self
            .backend
            .get(&collection, name)
            .await
            .map_err(map_backend)?
            .ok_or_else(|| RegistryError::NotFound(format!("scope `{name}`")))?;
        serde_json::from_value(doc)
            .map_err(|e| RegistryError::BackendUnavailable(format!("malformed scope record: {e}")))
    }

    pub async fn delete_scope(&self, namespace: &Namespace, name: &str) -> RegistryResult<bool> {
        let collection = Collections::new(namespace.clone()).scopes();
        let existed = self
            .backend
            .delete(&collection, name)
            .await
            .map_err(map_backend)?;
        if existed {
            let _ = self.scope_events.send(ScopeChange {
                namespace: namespace.clone(),
                name: name.to_string(),
            });
        }
        Ok(existed)
    }

    pub async fn list_scopes(&self, namespace: &Namespace) -> RegistryResult<Vec<ScopeRecord>> {
        let collection = Collections::new(namespace.clone()).scopes();
        let docs = self
            .backend
            .list(&collection, &Filter::all(), &ListOptions::default())
            .await
            .map_err(map_backend)?;
        docs.into_iter()
            .map(|doc| {
                serde_json::from_value(doc).map_err(|e| {
                    RegistryError::BackendUnavailable(format!("malformed scope record: {e}"))
                })
            })
            .collect()
    }

    // ---- security scans --------------------------------------------------

    pub async fn create_scan(
        &self,
        namespace: &Namespace,
        scan: SecurityScanRecord,
    ) -> RegistryResult<SecurityScanRecord> {
        let collection = Collections::new(namespace.clone()).scans();
        let doc = serde_json::to_value(&scan)
            .map_err(|e| RegistryError::Invalid(format!("scan serialization: {e}")))?;
        self.backend
            .insert(&collection, &scan.scan_id.to_string(), doc)
            .await
            .map_err(map_backend)?;
        Ok(scan)
    }

    pub async fn update_scan(
        &self,
        namespace: &Namespace,
        scan: SecurityScanRecord,
    ) -> RegistryResult<SecurityScanRecord> {
        let collection = Collections::new(namespace.clone()).scans();
        let doc = serde_json::to_value(&scan)
            .map_err(|e| RegistryError::Invalid(format!("scan serialization: {e}")))?;
        self.backend
            .put(&collection, &scan.scan_id.to_string(), doc)
            .await
            .map_err(map_backend)?;
        Ok(scan)
    }

    pub async fn get_scan(
        &self,
        namespace: &Namespace,
        scan_id: &ScanId,
    ) -> RegistryResult<SecurityScanRecord> {
        let collection = Collections::new(namespace.clone()).scans();
        let doc = self
            .backend
            .get(&collection, &scan_id.to_string())
            .await
            .map_err(map_backend)?
            .ok_or_else(|| RegistryError::NotFound(format!("{scan_id}")))?;
        serde_json::from_value(doc)
            .map_err(|e| RegistryError::BackendUnavailable(format!("malformed scan record: {e}")))
    }

    pub async fn list_scans_for_entity(
        &self,
        namespace: &Namespace,
        path: &str,
    ) -> RegistryResult<Vec<SecurityScanRecord>> {
        let collection = Collections::new(namespace.clone()).scans();
        let options = ListOptions {
            sort: Some(SortSpec::descending("scanned_at")),
            ..Default::default()
        };
        let docs = self
            .backend
            .list(&collection, &Filter::eq("entity_path", path), &options)
            .await
            .map_err(map_backend)?;
        docs.into_iter()
            .map(|doc| {
                serde_json::from_value(doc).map_err(|e| {
                    RegistryError::BackendUnavailable(format!("malformed scan record: {e}"))
                })
            })
            .collect()
    }

    // ---- embeddings ------------------------------------------------------

    pub async fn put_embedding(
        &self,
        namespace: &Namespace,
        record: EmbeddingRecord,
    ) -> RegistryResult<()> {
        if record.vector.len() != self.vector_dimension {
            return Err(RegistryError::Invalid(format!(
                "embedding dimension {} does not match collection dimension {}",
                record.vector.len(),
                self.vector_dimension
            )));
        }
        let collection = Collections::new(namespace.clone()).embeddings(self.vector_dimension);
        let key = EmbeddingRecord::key(&record.entity_path, record.entity_type);
        let doc = serde_json::to_value(&record)
            .map_err(|e| RegistryError::Invalid(format!("embedding serialization: {e}")))?;
        self.backend
            .put(&collection, &key, doc)
            .await
            .map_err(map_backend)
    }

    pub async fn get_embedding(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
    ) -> RegistryResult<Option<EmbeddingRecord>> {
        let collection = Collections::new(namespace.clone()).embeddings(self.vector_dimension);
        let key = EmbeddingRecord::key(path, entity_type);
        let doc = self
            .backend
            .get(&collection, &key)
            .await
            .map_err(map_backend)?;
        doc.map(|d| {
            serde_json::from_value(d).map_err(|e| {
                RegistryError::BackendUnavailable(format!("malformed embedding record: {e}"))
            })
        })
        .transpose()
    }

    pub async fn delete_embedding(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
    ) -> RegistryResult<bool> {
        let collection = Collections::new(namespace.clone()).embeddings(self.vector_dimension);
        let key = EmbeddingRecord::key(path, entity_type);
        self.backend
            .delete(&collection, &key)
            .await
            .map_err(map_backend)
    }

    pub async fn list_embeddings(
        &self,
        namespace: &Namespace,
        entity_type: Option<EntityType>,
    ) -> RegistryResult<Vec<EmbeddingRecord>> {
        let collection = Collections::new(namespace.clone()).embeddings(self.vector_dimension);
        let filter = match entity_type {
            Some(t) => Filter::eq("entity_type", t.as_str()),
            None => Filter::all(),
        };
        let docs = self
            .backend
            .list(&collection, &filter, &ListOptions::default())
            .await
            .map_err(map_backend)?;
        docs.into_iter()
            .map(|doc| {
                serde_json::from_value(doc).map_err(|e| {
                    RegistryError::BackendUnavailable(format!("malformed embedding record: {e}"))
                })
            })
            .collect()
    }

    /// Backend-side cosine top-k over embedding records of one entity type.
    pub async fn vector_search(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        query: &[f32],
        k: usize,
    ) -> RegistryResult<Vec<(String, f32)>> {
        let collection = Collections::new(namespace.clone()).embeddings(self.vector_dimension);
        let hits = self
            .backend
            .vector_search(
                &collection,
                query,
                k,
                &Filter::eq("entity_type", entity_type.as_str()),
            )
            .await
            .map_err(map_backend)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let path = hit
                    .key
                    .split_once("::")
                    .map(|(_, path)| path.to_string())?;
                Some((path, hit.score))
            })
            .collect())
    }

    // ---- internals -------------------------------------------------------

    fn publish_change(&self, namespace: &Namespace, op: ChangeOp, snapshot: Entity) {
        // Increment + send under one lock so seq matches delivery order.
        let _guard = self.publish.lock().unwrap_or_else(|e| e.into_inner());
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        let event = ChangeEvent {
            seq,
            namespace: namespace.clone(),
            entity_type: snapshot.entity_type(),
            path: snapshot.path().to_string(),
            op,
            snapshot,
        };
        debug!(seq, op = ?event.op, path = %event.path, "publishing change event");
        // No receivers is fine; lagged receivers drop events on their side.
        let _ = self.events.send(event);
    }
}

fn to_doc(entity: &Entity) -> RegistryResult<Value> {
    serde_json::to_value(entity)
        .map_err(|e| RegistryError::Invalid(format!("entity serialization: {e}")))
}

fn from_doc(doc: Value) -> RegistryResult<Entity> {
    serde_json::from_value(doc)
        .map_err(|e| RegistryError::BackendUnavailable(format!("malformed entity document: {e}")))
}

fn map_backend(err: BackendError) -> RegistryError {
    match err {
        BackendError::Conflict(msg) => RegistryError::Conflict(msg),
        BackendError::Invalid(msg) => RegistryError::Invalid(msg),
        BackendError::Serialization(msg) | BackendError::Unavailable(msg) => {
            RegistryError::BackendUnavailable(msg)
        }
    }
}
