//! Change-event synchronizer.
//!
//! A single task drains the store's broadcast channel and applies each event
//! to the embedding records and the index, in order. Transient embedding
//! failures re-queue the event with exponential backoff; after the retry
//! budget the event is dead-lettered and the stream moves on. A lagged
//! receiver triggers a full resync instead of silently losing updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use gateway_embeddings::Embedder;
use gateway_store::RegistryStore;
use gateway_types::{
    ChangeEvent, ChangeOp, EmbeddingRecord, Namespace, RegistryError, RegistryResult,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blob::{fingerprint, text_blob};
use crate::index::VectorIndex;
use crate::shard::IndexEntry;

/// Synchronizer tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry budget for transient embedding failures.
    pub max_retries: usize,
    /// Base backoff, doubled per attempt.
    pub base_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
        }
    }
}

/// An event that exhausted its retry budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub seq: u64,
    pub path: String,
    pub error: String,
}

/// Handle to the running synchronizer.
pub struct SyncHandle {
    join: JoinHandle<()>,
    store: Arc<RegistryStore>,
    processed_seq: Arc<AtomicU64>,
    drained: Arc<Notify>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl SyncHandle {
    /// Sequence number of the last applied change event.
    pub fn processed_seq(&self) -> u64 {
        self.processed_seq.load(Ordering::Acquire)
    }

    /// Wait until the index has caught up with the store, or the deadline
    /// passes. Returns whether the index is caught up - the timeout flag for
    /// writers that requested a synchronous wait.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let caught_up = || self.processed_seq() >= self.store.current_seq();
        if caught_up() {
            return true;
        }
        let _ = tokio::time::timeout(deadline, async {
            while !caught_up() {
                self.drained.notified().await;
            }
        })
        .await;
        caught_up()
    }

    /// Events dropped after exhausting retries.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .map(|dl| dl.clone())
            .unwrap_or_default()
    }

    /// Stop the synchronizer task.
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Spawn the synchronizer for the given namespaces.
pub fn spawn_synchronizer(
    store: Arc<RegistryStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    namespaces: Vec<Namespace>,
    config: SyncConfig,
) -> SyncHandle {
    let processed_seq = Arc::new(AtomicU64::new(store.current_seq()));
    let drained = Arc::new(Notify::new());
    let dead_letters = Arc::new(Mutex::new(Vec::new()));

    let mut rx = store.subscribe();
    let task_store = Arc::clone(&store);
    let task_seq = Arc::clone(&processed_seq);
    let task_drained = Arc::clone(&drained);
    let task_dead = Arc::clone(&dead_letters);

    let join = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let seq = event.seq;
                    if let Err(e) =
                        handle_event(&task_store, embedder.as_ref(), &index, &event, &config).await
                    {
                        warn!(seq, path = %event.path, error = %e, "change event dead-lettered");
                        if let Ok(mut dl) = task_dead.lock() {
                            dl.push(DeadLetter {
                                seq,
                                path: event.path.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                    task_seq.store(seq, Ordering::Release);
                    task_drained.notify_waiters();
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "synchronizer lagged, running full resync");
                    let target_seq = task_store.current_seq();
                    match index
                        .rebuild(&task_store, embedder.as_ref(), &namespaces)
                        .await
                    {
                        Ok(()) => {
                            info!("resync after lag complete");
                            task_seq.store(target_seq, Ordering::Release);
                            task_drained.notify_waiters();
                        }
                        Err(e) => warn!(error = %e, "resync after lag failed"),
                    }
                }
                Err(RecvError::Closed) => {
                    debug!("change-event channel closed, synchronizer stopping");
                    break;
                }
            }
        }
    });

    SyncHandle {
        join,
        store,
        processed_seq,
        drained,
        dead_letters,
    }
}

async fn handle_event(
    store: &RegistryStore,
    embedder: &dyn Embedder,
    index: &VectorIndex,
    event: &ChangeEvent,
    config: &SyncConfig,
) -> RegistryResult<()> {
    let reg = event.snapshot.as_registrable();
    match event.op {
        ChangeOp::Created | ChangeOp::Updated => {
            let blob = text_blob(reg);
            let print = fingerprint(&blob);

            let current = store
                .get_embedding(&event.namespace, event.entity_type, &event.path)
                .await?;
            let up_to_date = current
                .as_ref()
                .map(|record| record.fingerprint == print)
                .unwrap_or(false);

            let vector = if up_to_date {
                current.map(|record| record.vector).unwrap_or_default()
            } else {
                let vector = embed_with_backoff(embedder, &blob, config).await?;
                store
                    .put_embedding(
                        &event.namespace,
                        EmbeddingRecord {
                            entity_path: event.path.clone(),
                            entity_type: event.entity_type,
                            vector: vector.clone(),
                            text_blob: blob,
                            fingerprint: print,
                            updated_at: Utc::now(),
                        },
                    )
                    .await?;
                vector
            };

            index
                .upsert(
                    &event.namespace,
                    event.entity_type,
                    IndexEntry {
                        path: event.path.clone(),
                        vector,
                        updated_at: reg.updated_at(),
                        enabled: reg.is_enabled(),
                        tags: reg.tags().iter().cloned().collect(),
                    },
                )
                .await?;
        }
        ChangeOp::Toggled => {
            // Disabled entities stay discoverable; only the flag changes.
            index
                .set_enabled(
                    &event.namespace,
                    event.entity_type,
                    &event.path,
                    reg.is_enabled(),
                    reg.updated_at(),
                )
                .await;
        }
        ChangeOp::Deleted => {
            index
                .remove(&event.namespace, event.entity_type, &event.path)
                .await;
            store
                .delete_embedding(&event.namespace, event.entity_type, &event.path)
                .await?;
        }
    }
    Ok(())
}

/// Embed one blob, retrying transient failures with exponential backoff.
async fn embed_with_backoff(
    embedder: &dyn Embedder,
    blob: &str,
    config: &SyncConfig,
) -> RegistryResult<Vec<f32>> {
    let mut attempt = 0;
    loop {
        match embedder.embed(&[blob.to_string()]).await {
            Ok(mut vectors) => {
                return vectors.pop().ok_or_else(|| RegistryError::EmbeddingsFailed {
                    transient: false,
                    message: "provider returned no vector".to_string(),
                });
            }
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = config.base_backoff * 2u32.saturating_pow(attempt as u32);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying embed");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
