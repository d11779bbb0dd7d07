//! The orchestrator: public operations over the wired component graph.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use gateway_auth::{JwksCache, TokenVerifier};
use gateway_backend::{MemoryBackend, RegistryBackend};
use gateway_embeddings::{build_embedder, Embedder};
use gateway_health::{HealthSupervisor, HttpProber, Prober, SupervisorStats};
use gateway_index::{
    spawn_synchronizer, DeadLetter, IndexStats, SearchFilter, SyncConfig, SyncHandle, VectorIndex,
};
use gateway_scopes::{
    evaluate, load_table, spawn_scope_watcher, AccessRequest, Decision, ScopeEngine,
    ScopeLoaderConfig, ScopeTable,
};
use gateway_store::{EntityFilter, RegistryStore};
use gateway_types::{
    methods, CallerIdentity, ChangeEvent, Entity, EntityType, HealthEvent, Namespace,
    RegistryError, RegistryResult, SecurityScanRecord,
};
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{BackendConfig, BackendKind, GatewayConfig};
use crate::scan::{spawn_scan_worker, ScanJob};

/// Options on the write path.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Wait (up to `index.sync_wait_max`) for the index to absorb this
    /// write before returning, e.g. for CLI registration flows that read
    /// their own writes.
    pub wait_for_index: bool,
}

/// Result of a mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub entity: Entity,
    /// `None` when no synchronous wait was requested; `Some(false)` when
    /// the wait timed out (the write itself succeeded).
    pub index_synced: Option<bool>,
}

/// One ranked discovery result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub path: String,
    pub score: f32,
    pub entity: Entity,
}

/// Explicit construction graph with test seams for the backend, embedder,
/// and prober.
pub struct GatewayBuilder {
    config: GatewayConfig,
    backend: Option<Arc<dyn RegistryBackend>>,
    embedder: Option<Arc<dyn Embedder>>,
    prober: Option<Arc<dyn Prober>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            backend: None,
            embedder: None,
            prober: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn RegistryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Construct and start the gateway: prepare schemas, rebuild the index,
    /// load scopes, and spawn the background tasks.
    pub async fn build(self) -> RegistryResult<Gateway> {
        let config = self.config;

        let mut namespaces = Vec::new();
        for raw in config.all_namespaces() {
            namespaces.push(Namespace::new(raw)?);
        }
        let default_namespace = namespaces[0].clone();

        let backend = match self.backend {
            Some(backend) => backend,
            None => build_backend(&config.backend).await?,
        };
        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => build_embedder(&config.embeddings)?,
        };

        let store = Arc::new(RegistryStore::new(
            backend,
            config.embeddings.expected_dimension,
            config.index.event_capacity,
        ));
        for namespace in &namespaces {
            store.ensure_namespace(namespace).await?;
        }

        // The synchronizer subscribes before the rebuild so writes racing
        // construction are not lost; rebuild and live events apply the same
        // idempotent upserts.
        let index = Arc::new(VectorIndex::new(config.embeddings.expected_dimension));
        let sync = spawn_synchronizer(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&index),
            namespaces.clone(),
            SyncConfig {
                max_retries: config.index.max_retries,
                base_backoff: config.index.base_backoff,
            },
        );
        index
            .rebuild(&store, embedder.as_ref(), &namespaces)
            .await?;

        let scopes_config = ScopeLoaderConfig {
            admin_group_pattern: config.scopes.admin_group_pattern.clone(),
            accept_legacy_format: config.scopes.accept_legacy_format,
            files: config.scopes.files.clone(),
        };
        let scopes = Arc::new(ScopeEngine::new(
            load_table(&store, &default_namespace, &scopes_config).await?,
        ));
        let scope_watcher = spawn_scope_watcher(
            Arc::clone(&scopes),
            Arc::clone(&store),
            default_namespace.clone(),
            scopes_config.clone(),
        );

        let verifier = match &config.oauth {
            Some(oauth) => {
                let jwks = Arc::new(JwksCache::new(oauth.clone()));
                Some(TokenVerifier::new(jwks, oauth.clone()))
            }
            None => None,
        };

        let prober = match self.prober {
            Some(prober) => prober,
            None => Arc::new(
                HttpProber::new(
                    config.health.timeout,
                    config.health.probe_method,
                    config.health.danger_accept_invalid_certs,
                )
                .map_err(|e| RegistryError::Invalid(e.to_string()))?,
            ),
        };
        let supervisor =
            HealthSupervisor::new(config.health.clone(), Arc::clone(&store), prober);
        supervisor.load_targets(&namespaces).await?;
        let supervisor_run = tokio::spawn(Arc::clone(&supervisor).run());
        let target_watcher =
            tokio::spawn(Arc::clone(&supervisor).run_target_watcher(namespaces.clone()));

        let (scan_tx, scan_rx) = mpsc::channel(128);
        let scan_worker = spawn_scan_worker(Arc::clone(&store), scan_rx);

        info!(
            namespaces = namespaces.len(),
            dimension = config.embeddings.expected_dimension,
            "gateway ready"
        );

        Ok(Gateway {
            default_namespace,
            store,
            embedder,
            index,
            sync,
            scopes,
            scopes_config,
            verifier,
            supervisor,
            scan_tx: Mutex::new(Some(scan_tx)),
            scans_enabled: config.scans.enabled,
            sync_wait_max: config.index.sync_wait_max,
            accepting: AtomicBool::new(true),
            tasks: Mutex::new(vec![scope_watcher, supervisor_run, target_watcher, scan_worker]),
        })
    }
}

async fn build_backend(config: &BackendConfig) -> RegistryResult<Arc<dyn RegistryBackend>> {
    match config.kind {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::Postgres => build_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn build_postgres(config: &BackendConfig) -> RegistryResult<Arc<dyn RegistryBackend>> {
    let endpoint = config.endpoint.as_deref().ok_or_else(|| {
        RegistryError::Invalid("backend.endpoint is required for postgres".to_string())
    })?;
    let backend = gateway_backend::postgres::PostgresBackend::connect_with_options(
        endpoint,
        config.max_connections,
        config.connect_timeout_secs,
    )
    .await
    .map_err(|e| RegistryError::BackendUnavailable(e.to_string()))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "postgres"))]
async fn build_postgres(_config: &BackendConfig) -> RegistryResult<Arc<dyn RegistryBackend>> {
    Err(RegistryError::Invalid(
        "backend.kind = postgres requires the `postgres` feature".to_string(),
    ))
}

/// The embeddable gateway core.
pub struct Gateway {
    default_namespace: Namespace,
    store: Arc<RegistryStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    sync: SyncHandle,
    scopes: Arc<ScopeEngine>,
    scopes_config: ScopeLoaderConfig,
    verifier: Option<TokenVerifier>,
    supervisor: Arc<HealthSupervisor>,
    scan_tx: Mutex<Option<mpsc::Sender<ScanJob>>>,
    scans_enabled: bool,
    sync_wait_max: Duration,
    accepting: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Build from configuration with default components.
    pub async fn build(config: GatewayConfig) -> RegistryResult<Self> {
        GatewayBuilder::new(config).build().await
    }

    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn default_namespace(&self) -> &Namespace {
        &self.default_namespace
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    // ---- operations ------------------------------------------------------

    /// Register a new server or agent.
    pub async fn register_entity(
        &self,
        namespace: &Namespace,
        entity: Entity,
        identity: &CallerIdentity,
        options: WriteOptions,
    ) -> RegistryResult<MutationOutcome> {
        self.guarded("register_entity", async {
            self.ensure_accepting()?;
            self.require(identity, entity.path(), methods::ADMIN).await?;
            let _guard = self
                .store
                .lock_entity(namespace, entity.entity_type(), entity.path())
                .await;
            let snapshot = self.store.create_entity(namespace, entity).await?;
            self.begin_scan(namespace, &snapshot).await;
            let index_synced = self.maybe_wait(options).await;
            Ok(MutationOutcome {
                entity: snapshot,
                index_synced,
            })
        })
        .await
    }

    /// Replace an existing entity.
    pub async fn update_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        entity: Entity,
        identity: &CallerIdentity,
        options: WriteOptions,
    ) -> RegistryResult<MutationOutcome> {
        self.guarded("update_entity", async {
            self.ensure_accepting()?;
            self.require(identity, path, methods::ADMIN).await?;
            let _guard = self
                .store
                .lock_entity(namespace, entity_type, path)
                .await;
            let snapshot = self
                .store
                .update_entity(namespace, entity_type, path, entity)
                .await?;
            let index_synced = self.maybe_wait(options).await;
            Ok(MutationOutcome {
                entity: snapshot,
                index_synced,
            })
        })
        .await
    }

    /// Delete an entity and its derived state.
    pub async fn delete_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        identity: &CallerIdentity,
    ) -> RegistryResult<()> {
        self.guarded("delete_entity", async {
            self.ensure_accepting()?;
            self.require(identity, path, methods::ADMIN).await?;
            let _guard = self
                .store
                .lock_entity(namespace, entity_type, path)
                .await;
            self.store
                .delete_entity(namespace, entity_type, path)
                .await?;
            Ok(())
        })
        .await
    }

    /// Enable or disable an entity; returns the new state.
    pub async fn toggle_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        enabled: bool,
        identity: &CallerIdentity,
    ) -> RegistryResult<Entity> {
        self.guarded("toggle_entity", async {
            self.ensure_accepting()?;
            self.require(identity, path, methods::ADMIN).await?;
            let _guard = self
                .store
                .lock_entity(namespace, entity_type, path)
                .await;
            self.store
                .toggle_entity(namespace, entity_type, path, enabled)
                .await
        })
        .await
    }

    /// Fetch one entity, health subrecord included.
    pub async fn get_entity(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        path: &str,
        identity: &CallerIdentity,
    ) -> RegistryResult<Entity> {
        self.guarded("get_entity", async {
            self.ensure_accepting()?;
            self.require(identity, path, methods::LIST).await?;
            self.with_read_retry(|| self.store.get_entity(namespace, entity_type, path))
                .await
        })
        .await
    }

    /// List entities the caller may at minimum `list`.
    pub async fn list_entities(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        filter: &EntityFilter,
        identity: &CallerIdentity,
        limit: Option<usize>,
        offset: usize,
    ) -> RegistryResult<Vec<Entity>> {
        self.guarded("list_entities", async {
            self.ensure_accepting()?;
            let entities = self
                .with_read_retry(|| {
                    self.store
                        .list_entities(namespace, entity_type, filter, limit, offset)
                })
                .await?;
            let table = self.scopes.snapshot().await;
            Ok(entities
                .into_iter()
                .filter(|entity| {
                    evaluate(
                        &table,
                        &identity.groups,
                        &AccessRequest::new(entity.path(), methods::LIST),
                    )
                    .is_allowed()
                })
                .collect())
        })
        .await
    }

    /// Semantic top-k over one entity type, permission-filtered.
    pub async fn search_entities(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        identity: &CallerIdentity,
    ) -> RegistryResult<Vec<SearchResult>> {
        self.guarded("search_entities", async {
            self.ensure_accepting()?;
            if k == 0 || query.trim().is_empty() {
                return Ok(Vec::new());
            }

            let mut vectors = self
                .embedder
                .embed(&[query.to_string()])
                .await
                .map_err(RegistryError::from)?;
            let query_vector = vectors.pop().ok_or_else(|| RegistryError::EmbeddingsFailed {
                transient: false,
                message: "provider returned no vector".to_string(),
            })?;

            // Oversample so permission filtering still fills k results.
            let hits = self
                .index
                .search(namespace, entity_type, &query_vector, k * 4, filter)
                .await;

            let table = self.scopes.snapshot().await;
            let mut results = Vec::with_capacity(k);
            for hit in hits {
                if results.len() == k {
                    break;
                }
                let allowed = evaluate(
                    &table,
                    &identity.groups,
                    &AccessRequest::new(&hit.path, methods::LIST),
                )
                .is_allowed();
                if !allowed {
                    continue;
                }
                match self.store.get_entity(namespace, entity_type, &hit.path).await {
                    Ok(entity) => results.push(SearchResult {
                        path: hit.path,
                        score: hit.score,
                        entity,
                    }),
                    // Index lag: entity deleted after the hit was scored.
                    Err(RegistryError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok(results)
        })
        .await
    }

    /// Pure authorization decision for a proxied call.
    pub async fn authorize_call(
        &self,
        identity: &CallerIdentity,
        service_path: &str,
        method: &str,
        tool: Option<&str>,
    ) -> Decision {
        let mut request = AccessRequest::new(service_path, method);
        if let Some(tool) = tool {
            request = request.with_tool(tool);
        }
        self.scopes.authorize(identity, &request).await
    }

    /// Load a fresh scope-table snapshot for a namespace.
    pub async fn load_scope_table(&self, namespace: &Namespace) -> RegistryResult<ScopeTable> {
        self.guarded("load_scope_table", async {
            load_table(&self.store, namespace, &self.scopes_config).await
        })
        .await
    }

    /// Verify a bearer token into a caller identity.
    pub async fn verify_token(&self, token: &str) -> RegistryResult<CallerIdentity> {
        match &self.verifier {
            Some(verifier) => verifier.verify(token).await,
            None => Err(RegistryError::Invalid(
                "token verification is not configured".to_string(),
            )),
        }
    }

    // ---- observation -----------------------------------------------------

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.supervisor.subscribe()
    }

    pub async fn index_stats(&self) -> IndexStats {
        self.index.stats().await
    }

    pub fn supervisor_stats(&self) -> SupervisorStats {
        self.supervisor.stats()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.sync.dead_letters()
    }

    /// Wait for the index to catch up with the store.
    pub async fn wait_for_index(&self, deadline: Duration) -> bool {
        self.sync.wait_for_drain(deadline).await
    }

    /// Stop intake, drain the index, stop the supervisor, and join tasks.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        if !self.sync.wait_for_drain(self.sync_wait_max).await {
            warn!("index synchronizer did not drain before shutdown");
        }
        self.supervisor.stop().await;
        if let Ok(mut tx) = self.scan_tx.lock() {
            // Closing the queue lets the scan worker finish its backlog.
            tx.take();
        }
        self.sync.abort();
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            handle.abort();
        }
        info!("gateway shut down");
    }

    // ---- internals -------------------------------------------------------

    fn ensure_accepting(&self) -> RegistryResult<()> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RegistryError::BackendUnavailable(
                "gateway is shutting down".to_string(),
            ))
        }
    }

    async fn require(
        &self,
        identity: &CallerIdentity,
        path: &str,
        method: &str,
    ) -> RegistryResult<()> {
        match self
            .scopes
            .authorize(identity, &AccessRequest::new(path, method))
            .await
        {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(RegistryError::Forbidden(reason.to_string())),
        }
    }

    async fn maybe_wait(&self, options: WriteOptions) -> Option<bool> {
        if options.wait_for_index {
            Some(self.sync.wait_for_drain(self.sync_wait_max).await)
        } else {
            None
        }
    }

    /// Persist a pending scan record and queue the scan job. Best effort:
    /// registration never fails because scanning is degraded.
    async fn begin_scan(&self, namespace: &Namespace, entity: &Entity) {
        if !self.scans_enabled {
            return;
        }
        let record = SecurityScanRecord::pending(entity.path(), entity.entity_type());
        if let Err(e) = self.store.create_scan(namespace, record.clone()).await {
            warn!(path = entity.path(), error = %e, "failed to persist pending scan");
            return;
        }
        let job = ScanJob {
            namespace: namespace.clone(),
            record,
            entity: entity.clone(),
        };
        let sender = self
            .scan_tx
            .lock()
            .ok()
            .and_then(|tx| tx.as_ref().cloned());
        match sender {
            Some(sender) => {
                if let Err(e) = sender.try_send(job) {
                    warn!(path = entity.path(), error = %e, "scan queue full, scan dropped");
                }
            }
            None => warn!(path = entity.path(), "scan queue closed, scan dropped"),
        }
    }

    /// Retry an idempotent read once with jitter when the backend was
    /// unavailable. Writes are never retried here; the caller owns those
    /// semantics.
    async fn with_read_retry<T, F, Fut>(&self, mut call: F) -> RegistryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RegistryResult<T>>,
    {
        match call().await {
            Err(RegistryError::BackendUnavailable(first)) => {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(25..100));
                tokio::time::sleep(jitter).await;
                call().await.map_err(|e| match e {
                    RegistryError::BackendUnavailable(_) => {
                        RegistryError::BackendUnavailable(first)
                    }
                    other => other,
                })
            }
            other => other,
        }
    }

    /// Contain panics at the operation boundary: log with a correlation id
    /// and surface an opaque internal error.
    async fn guarded<T, F>(&self, op: &'static str, fut: F) -> RegistryResult<T>
    where
        F: Future<Output = RegistryResult<T>>,
    {
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                let correlation_id = Uuid::new_v4().to_string();
                error!(op, correlation_id = %correlation_id, "operation panicked");
                Err(RegistryError::Internal { correlation_id })
            }
        }
    }
}
