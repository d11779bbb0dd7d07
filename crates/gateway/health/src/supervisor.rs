//! Probe scheduling, state publication, and target maintenance.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use gateway_store::{EntityFilter, RegistryStore};
use gateway_types::{
    ChangeEvent, ChangeOp, EntityType, HealthEvent, HealthState, Namespace, RegistryError,
};
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::probe::{ProbeTarget, Prober};
use crate::state::TargetHealth;

type TargetKey = (Namespace, EntityType, String);

struct TargetEntry {
    target: ProbeTarget,
    health: TargetHealth,
}

/// Counters for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStats {
    pub targets: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub in_flight: usize,
}

/// Periodic liveness supervisor.
pub struct HealthSupervisor {
    config: HealthConfig,
    store: Arc<RegistryStore>,
    prober: Arc<dyn Prober>,
    targets: DashMap<TargetKey, TargetEntry>,
    events: broadcast::Sender<HealthEvent>,
    probe_slots: Arc<Semaphore>,
    running: Arc<RwLock<bool>>,
}

impl HealthSupervisor {
    pub fn new(
        config: HealthConfig,
        store: Arc<RegistryStore>,
        prober: Arc<dyn Prober>,
    ) -> Arc<Self> {
        let probe_slots = Arc::new(Semaphore::new(config.concurrency_limit.max(1)));
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            store,
            prober,
            targets: DashMap::new(),
            events,
            probe_slots,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Subscribe to state transitions (e.g. for an admin SSE stream).
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> SupervisorStats {
        let mut stats = SupervisorStats {
            targets: 0,
            healthy: 0,
            unhealthy: 0,
            unknown: 0,
            in_flight: self
                .config
                .concurrency_limit
                .saturating_sub(self.probe_slots.available_permits()),
        };
        for entry in self.targets.iter() {
            stats.targets += 1;
            match entry.health.state {
                HealthState::Healthy => stats.healthy += 1,
                HealthState::Unhealthy => stats.unhealthy += 1,
                HealthState::Unknown => stats.unknown += 1,
                HealthState::Disabled => {}
            }
        }
        stats
    }

    /// Register every enabled registrable in the given namespaces.
    pub async fn load_targets(&self, namespaces: &[Namespace]) -> Result<(), RegistryError> {
        for namespace in namespaces {
            for entity_type in [EntityType::Server, EntityType::Agent] {
                let filter = EntityFilter {
                    enabled_only: true,
                    ..Default::default()
                };
                let entities = self
                    .store
                    .list_entities(namespace, entity_type, &filter, None, 0)
                    .await?;
                for entity in entities {
                    self.add_target(ProbeTarget::from_entity(namespace, &entity));
                }
            }
        }
        info!(targets = self.targets.len(), "probe targets loaded");
        Ok(())
    }

    pub fn add_target(&self, target: ProbeTarget) {
        let key = (
            target.namespace.clone(),
            target.entity_type,
            target.path.clone(),
        );
        debug!(path = %target.path, "probe target added");
        self.targets
            .entry(key)
            .and_modify(|entry| entry.target = target.clone())
            .or_insert_with(|| TargetEntry {
                target,
                health: TargetHealth::default(),
            });
    }

    /// Remove a target, marking it disabled and publishing the transition.
    pub async fn remove_target(&self, namespace: &Namespace, entity_type: EntityType, path: &str) {
        let key = (namespace.clone(), entity_type, path.to_string());
        if let Some((_, mut entry)) = self.targets.remove(&key) {
            debug!(path, "probe target removed");
            if let Some((previous, current)) = entry.health.disable() {
                self.publish_transition(&entry.target, &entry.health, previous, current)
                    .await;
            }
        }
    }

    /// Main probe loop. Runs until [`stop`](Self::stop).
    pub async fn run(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "health supervisor started"
        );

        let mut ticker = interval(self.config.interval);
        loop {
            ticker.tick().await;
            if !*self.running.read().await {
                break;
            }
            self.probe_round().await;
        }
        info!("health supervisor stopped");
    }

    /// Stop the probe loop after the current round.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Kick off one jittered probe per target. Probes run concurrently,
    /// bounded by the semaphore.
    async fn probe_round(self: &Arc<Self>) {
        let targets: Vec<ProbeTarget> = self
            .targets
            .iter()
            .map(|entry| entry.target.clone())
            .collect();
        debug!(targets = targets.len(), "probe round starting");

        for target in targets {
            let supervisor = Arc::clone(self);
            // Spread probes over the first fifth of the interval so rounds
            // do not stampede upstreams.
            let jitter = rand::thread_rng()
                .gen_range(0..=self.config.interval.as_millis() as u64 / 5);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
                supervisor.probe_one(target).await;
            });
        }
    }

    async fn probe_one(self: Arc<Self>, target: ProbeTarget) {
        let permit = match Arc::clone(&self.probe_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let success = tokio::time::timeout(self.config.timeout, self.prober.probe(&target))
            .await
            .unwrap_or(false);
        drop(permit);

        let key = (
            target.namespace.clone(),
            target.entity_type,
            target.path.clone(),
        );
        let transition = {
            let Some(mut entry) = self.targets.get_mut(&key) else {
                return;
            };
            let transition = entry.health.apply_probe(
                success,
                Utc::now(),
                self.config.unhealthy_threshold,
                self.config.healthy_threshold,
            );
            transition.map(|t| (t, entry.health.clone()))
        };

        if let Some(((previous, current), health)) = transition {
            self.publish_transition(&target, &health, previous, current)
                .await;
        }
    }

    async fn publish_transition(
        &self,
        target: &ProbeTarget,
        health: &TargetHealth,
        previous: HealthState,
        current: HealthState,
    ) {
        info!(
            path = %target.path,
            previous = %previous,
            current = %current,
            "health transition"
        );

        self.write_back(target, health).await;

        let _ = self.events.send(HealthEvent {
            namespace: target.namespace.clone(),
            entity_type: target.entity_type,
            path: target.path.clone(),
            previous,
            current,
            at: Utc::now(),
        });
    }

    /// Persist the health subrecord with bounded, jittered backoff. On final
    /// failure the update is dropped with a log line; the next transition
    /// will carry fresher state anyway.
    async fn write_back(&self, target: &ProbeTarget, health: &TargetHealth) {
        let mut attempt = 0;
        loop {
            match self
                .store
                .write_health(
                    &target.namespace,
                    target.entity_type,
                    &target.path,
                    health.to_record(),
                )
                .await
            {
                Ok(()) => return,
                Err(RegistryError::NotFound(_)) => return,
                Err(e) if attempt + 1 < self.config.writeback_attempts => {
                    let backoff = self.config.writeback_backoff * 2u32.saturating_pow(attempt);
                    let jitter =
                        std::time::Duration::from_millis(rand::thread_rng().gen_range(0..50));
                    debug!(path = %target.path, attempt, error = %e, "health writeback retry");
                    tokio::time::sleep(backoff + jitter).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(path = %target.path, error = %e, "health writeback dropped");
                    return;
                }
            }
        }
    }

    /// Maintain the target set from store change events. Runs until the
    /// channel closes.
    pub async fn run_target_watcher(self: Arc<Self>, namespaces: Vec<Namespace>) {
        let mut rx = self.store.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.apply_change(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "target watcher lagged, reloading targets");
                    if let Err(e) = self.load_targets(&namespaces).await {
                        warn!(error = %e, "target reload failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn apply_change(&self, event: &ChangeEvent) {
        match event.op {
            ChangeOp::Created | ChangeOp::Updated | ChangeOp::Toggled => {
                if event.snapshot.is_enabled() {
                    self.add_target(ProbeTarget::from_entity(&event.namespace, &event.snapshot));
                } else {
                    self.remove_target(&event.namespace, event.entity_type, &event.path)
                        .await;
                }
            }
            ChangeOp::Deleted => {
                self.remove_target(&event.namespace, event.entity_type, &event.path)
                    .await;
            }
        }
    }
}
