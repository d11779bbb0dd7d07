//! Supervisor behavior: threshold transitions and graceful backend outage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gateway_backend::{
    BackendError, BackendResult, CollectionSpec, Filter, ListOptions, MemoryBackend,
    RegistryBackend, VectorHit,
};
use gateway_health::{HealthConfig, HealthSupervisor, ProbeTarget, Prober};
use gateway_store::RegistryStore;
use gateway_types::{Entity, EntityType, HealthState, Namespace, ServerEntity};
use serde_json::Value;

/// Prober that replays a scripted outcome sequence, then repeats the last.
struct ScriptedProber {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
}

impl ScriptedProber {
    fn new(outcomes: &[bool], fallback: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.iter().copied().collect()),
            fallback,
        })
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, _target: &ProbeTarget) -> bool {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

/// Backend decorator that fails writes while the switch is on.
struct FlakyBackend {
    inner: MemoryBackend,
    fail_writes: AtomicBool,
}

impl FlakyBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            fail_writes: AtomicBool::new(false),
        })
    }

    fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> BackendResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("injected outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryBackend for FlakyBackend {
    async fn ensure_schema(&self, spec: &CollectionSpec) -> BackendResult<()> {
        self.inner.ensure_schema(spec).await
    }

    async fn get(&self, collection: &str, key: &str) -> BackendResult<Option<Value>> {
        self.inner.get(collection, key).await
    }

    async fn insert(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()> {
        self.check()?;
        self.inner.insert(collection, key, doc).await
    }

    async fn put(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()> {
        self.check()?;
        self.inner.put(collection, key, doc).await
    }

    async fn delete(&self, collection: &str, key: &str) -> BackendResult<bool> {
        self.check()?;
        self.inner.delete(collection, key).await
    }

    async fn list(
        &self,
        collection: &str,
        filter: &Filter,
        options: &ListOptions,
    ) -> BackendResult<Vec<Value>> {
        self.inner.list(collection, filter, options).await
    }

    async fn vector_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: &Filter,
    ) -> BackendResult<Vec<VectorHit>> {
        self.inner.vector_search(collection, query, k, filter).await
    }
}

fn server(path: &str) -> Entity {
    Entity::Server(ServerEntity {
        path: path.to_string(),
        name: "svc".to_string(),
        description: String::new(),
        proxy_url: "http://upstream:8080".to_string(),
        supported_transports: Default::default(),
        tags: Default::default(),
        tools: vec![],
        version: String::new(),
        is_enabled: true,
        auth_provider_info: None,
        health: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    })
}

fn fast_config() -> HealthConfig {
    HealthConfig {
        interval: Duration::from_millis(20),
        timeout: Duration::from_millis(200),
        concurrency_limit: 4,
        unhealthy_threshold: 3,
        healthy_threshold: 1,
        writeback_attempts: 2,
        writeback_backoff: Duration::from_millis(5),
        probe_method: gateway_health::ProbeMethod::HttpGet,
        danger_accept_invalid_certs: false,
    }
}

async fn next_transition(
    rx: &mut tokio::sync::broadcast::Receiver<gateway_types::HealthEvent>,
) -> gateway_types::HealthEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for health event")
        .expect("health event channel closed")
}

#[tokio::test]
async fn three_failures_then_one_success_walks_the_state_machine() {
    let store = Arc::new(RegistryStore::new(Arc::new(MemoryBackend::new()), 3, 64));
    let ns = Namespace::default();
    store.ensure_namespace(&ns).await.unwrap();
    store.create_entity(&ns, server("/svc/hello")).await.unwrap();

    // 500s three times in a row, then 200s.
    let prober = ScriptedProber::new(&[false, false, false], true);
    let supervisor = HealthSupervisor::new(fast_config(), Arc::clone(&store), prober);
    supervisor.load_targets(&[ns.clone()]).await.unwrap();

    let mut rx = supervisor.subscribe();
    let runner = tokio::spawn(Arc::clone(&supervisor).run());

    let unhealthy = next_transition(&mut rx).await;
    assert_eq!(unhealthy.previous, HealthState::Unknown);
    assert_eq!(unhealthy.current, HealthState::Unhealthy);

    let healthy = next_transition(&mut rx).await;
    assert_eq!(healthy.previous, HealthState::Unhealthy);
    assert_eq!(healthy.current, HealthState::Healthy);

    supervisor.stop().await;
    runner.abort();

    // The last transition reached the entity's health subrecord.
    let entity = store
        .get_entity(&ns, EntityType::Server, "/svc/hello")
        .await
        .unwrap();
    assert_eq!(entity.health().unwrap().state, HealthState::Healthy);
}

#[tokio::test]
async fn supervisor_survives_backend_outage_and_recovers() {
    let backend = FlakyBackend::new();
    let store = Arc::new(RegistryStore::new(
        Arc::clone(&backend) as Arc<dyn RegistryBackend>,
        3,
        64,
    ));
    let ns = Namespace::default();
    store.ensure_namespace(&ns).await.unwrap();
    store.create_entity(&ns, server("/svc/hello")).await.unwrap();

    // First a success (Unknown -> Healthy, writeback dropped during the
    // outage), then failures driving Healthy -> Unhealthy after recovery.
    let prober = ScriptedProber::new(&[true], false);
    let supervisor = HealthSupervisor::new(fast_config(), Arc::clone(&store), prober);
    supervisor.load_targets(&[ns.clone()]).await.unwrap();

    backend.set_fail_writes(true);

    let mut rx = supervisor.subscribe();
    let runner = tokio::spawn(Arc::clone(&supervisor).run());

    let first = next_transition(&mut rx).await;
    assert_eq!(first.current, HealthState::Healthy);

    // Probing continued through the outage; now let the backend heal.
    backend.set_fail_writes(false);

    let second = next_transition(&mut rx).await;
    assert_eq!(second.current, HealthState::Unhealthy);

    supervisor.stop().await;
    runner.abort();

    let entity = store
        .get_entity(&ns, EntityType::Server, "/svc/hello")
        .await
        .unwrap();
    assert_eq!(entity.health().unwrap().state, HealthState::Unhealthy);
}

#[tokio::test]
async fn removed_target_publishes_disabled() {
    let store = Arc::new(RegistryStore::new(Arc::new(MemoryBackend::new()), 3, 64));
    let ns = Namespace::default();
    store.ensure_namespace(&ns).await.unwrap();
    store.create_entity(&ns, server("/svc/hello")).await.unwrap();

    let prober = ScriptedProber::new(&[], true);
    let supervisor = HealthSupervisor::new(fast_config(), Arc::clone(&store), prober);
    supervisor.load_targets(&[ns.clone()]).await.unwrap();

    let mut rx = supervisor.subscribe();
    supervisor
        .remove_target(&ns, EntityType::Server, "/svc/hello")
        .await;

    let event = next_transition(&mut rx).await;
    assert_eq!(event.current, HealthState::Disabled);
    assert_eq!(supervisor.stats().targets, 0);
}
