//! Scope table loading and live reload.
//!
//! Tables are assembled from optional JSON scope files plus the scope records
//! stored in the registry; stored records win on name collisions. A watcher
//! task rebuilds the table whenever a scope record mutates.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use gateway_store::RegistryStore;
use gateway_types::{Namespace, Permission, RegistryError, RegistryResult, ScopeRecord};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::ScopeEngine;
use crate::table::ScopeTable;

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct ScopeLoaderConfig {
    /// Group name (optionally `*`-suffixed) carrying the synthetic full grant.
    pub admin_group_pattern: String,
    /// Accept the legacy group-centric file shape alongside the canonical
    /// permission-centric one.
    pub accept_legacy_format: bool,
    /// Scope files loaded beneath stored records.
    pub files: Vec<PathBuf>,
}

impl Default for ScopeLoaderConfig {
    fn default() -> Self {
        Self {
            admin_group_pattern: "mcp-registry-admin".to_string(),
            accept_legacy_format: true,
            files: Vec::new(),
        }
    }
}

/// Canonical file shape: a list of permission-centric records.
#[derive(Debug, Deserialize)]
struct CanonicalScopeFile {
    scopes: Vec<ScopeRecord>,
}

/// Legacy group-centric shape: one grant block per group.
#[derive(Debug, Deserialize)]
struct LegacyScopeFile {
    groups: HashMap<String, LegacyGrant>,
}

#[derive(Debug, Deserialize)]
struct LegacyGrant {
    #[serde(default)]
    servers: Vec<String>,
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    description: String,
}

fn normalize_legacy(file: LegacyScopeFile) -> Vec<ScopeRecord> {
    file.groups
        .into_iter()
        .map(|(name, grant)| ScopeRecord {
            name,
            description: grant.description,
            permissions: grant
                .servers
                .iter()
                .map(|server| Permission {
                    server: server.clone(),
                    methods: grant.methods.clone(),
                    tools: grant.tools.clone(),
                })
                .collect(),
        })
        .collect()
}

/// Parse scope files from disk. Canonical shape is tried first; the legacy
/// shape only when enabled.
pub fn load_scope_files(config: &ScopeLoaderConfig) -> RegistryResult<Vec<ScopeRecord>> {
    let mut records = Vec::new();
    for path in &config.files {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Invalid(format!("scope file {}: {e}", path.display()))
        })?;

        if let Ok(canonical) = serde_json::from_str::<CanonicalScopeFile>(&raw) {
            records.extend(canonical.scopes);
            continue;
        }
        if config.accept_legacy_format {
            if let Ok(legacy) = serde_json::from_str::<LegacyScopeFile>(&raw) {
                debug!(file = %path.display(), "normalized legacy scope file");
                records.extend(normalize_legacy(legacy));
                continue;
            }
        }
        return Err(RegistryError::Invalid(format!(
            "scope file {} matches no accepted shape",
            path.display()
        )));
    }
    Ok(records)
}

/// Build a table from files plus stored records for one namespace.
pub async fn load_table(
    store: &RegistryStore,
    namespace: &Namespace,
    config: &ScopeLoaderConfig,
) -> RegistryResult<ScopeTable> {
    let mut table = ScopeTable::new(config.admin_group_pattern.clone());
    for record in load_scope_files(config)? {
        table.insert(record);
    }
    // Stored records override file-provided defaults.
    for record in store.list_scopes(namespace).await? {
        table.insert(record);
    }
    Ok(table)
}

/// Spawn the reload watcher. The task ends when the store's scope channel
/// closes; callers may also abort the handle on shutdown.
pub fn spawn_scope_watcher(
    engine: Arc<ScopeEngine>,
    store: Arc<RegistryStore>,
    namespace: Namespace,
    config: ScopeLoaderConfig,
) -> JoinHandle<()> {
    let mut rx = store.subscribe_scopes();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if change.namespace != namespace {
                        continue;
                    }
                    debug!(scope = %change.name, "scope record changed, reloading table");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "scope watcher lagged, reloading table");
                }
                Err(RecvError::Closed) => break,
            }

            match load_table(&store, &namespace, &config).await {
                Ok(table) => {
                    info!(scopes = table.len(), "scope table reloaded");
                    engine.replace(table).await;
                }
                Err(e) => {
                    // Keep serving the previous snapshot.
                    warn!(error = %e, "scope table reload failed");
                }
            }
        }
    })
}
