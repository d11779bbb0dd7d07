//! Gateway configuration.
//!
//! One structured object carries every runtime knob; `GatewayConfig::load`
//! layers a file under `GATEWAY__`-prefixed environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gateway_auth::OAuthConfig;
use gateway_embeddings::{EmbeddingsConfig, EmbeddingsProvider};
use gateway_health::HealthConfig;
use gateway_types::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};

/// Which backend driver to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Connection string for `postgres`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            endpoint: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Index synchronizer knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Max time a writer may wait for the index to catch up.
    pub sync_wait_max: Duration,
    /// Capacity of the change-event broadcast channel.
    pub event_capacity: usize,
    /// Retry budget for transient embedding failures.
    pub max_retries: usize,
    /// Base backoff for those retries, doubled per attempt.
    pub base_backoff: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            sync_wait_max: Duration::from_secs(5),
            event_capacity: 256,
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
        }
    }
}

/// Scope engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopesConfig {
    /// Group name (optionally `*`-suffixed) granted everything.
    pub admin_group_pattern: String,
    /// Accept legacy group-centric scope files.
    pub accept_legacy_format: bool,
    /// Scope files loaded beneath stored records.
    pub files: Vec<PathBuf>,
}

impl Default for ScopesConfig {
    fn default() -> Self {
        Self {
            admin_group_pattern: "mcp-registry-admin".to_string(),
            accept_legacy_format: true,
            files: Vec::new(),
        }
    }
}

/// Security scan knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScansConfig {
    /// Enqueue a scan for every registration.
    pub enabled: bool,
}

impl Default for ScansConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// The single configuration object for the whole gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Namespace assumed when none is specified.
    #[serde(default = "default_namespace")]
    pub namespace_default: String,
    /// Additional namespaces served beside the default.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub backend: BackendConfig,
    pub embeddings: EmbeddingsConfig,
    /// Token verification; absent means the termination layer supplies
    /// already-verified identities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub scopes: ScopesConfig,
    #[serde(default)]
    pub scans: ScansConfig,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            namespace_default: default_namespace(),
            namespaces: Vec::new(),
            backend: BackendConfig::default(),
            embeddings: EmbeddingsConfig {
                provider: EmbeddingsProvider::Local,
                model_name: "BAAI/bge-small-en-v1.5".to_string(),
                expected_dimension: 384,
                api_base: None,
                api_key: None,
            },
            oauth: None,
            health: HealthConfig::default(),
            index: IndexConfig::default(),
            scopes: ScopesConfig::default(),
            scans: ScansConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from a file, then apply `GATEWAY__SECTION__KEY` environment
    /// overrides.
    pub fn load(path: &Path) -> RegistryResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"))
            .build()
            .map_err(|e| RegistryError::Invalid(format!("configuration: {e}")))?;
        settings
            .try_deserialize()
            .map_err(|e| RegistryError::Invalid(format!("configuration: {e}")))
    }

    /// All namespaces this gateway serves, default first, deduplicated.
    pub fn all_namespaces(&self) -> Vec<String> {
        let mut out = vec![self.namespace_default.clone()];
        for ns in &self.namespaces {
            if !out.contains(ns) {
                out.push(ns.clone());
            }
        }
        out
    }
}
