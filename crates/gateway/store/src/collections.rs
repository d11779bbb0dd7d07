//! Collection naming. Every collection is suffixed with its namespace so
//! tenants are isolated at the storage layer.

use gateway_types::{EntityType, Namespace};

/// Collection-name builder for one namespace.
#[derive(Debug, Clone)]
pub struct Collections {
    namespace: Namespace,
}

impl Collections {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn registrables(&self, entity_type: EntityType) -> String {
        format!(
            "registry.{}.{}",
            entity_type.collection_stem(),
            self.namespace
        )
    }

    pub fn scopes(&self) -> String {
        format!("registry.scopes.{}", self.namespace)
    }

    pub fn scans(&self) -> String {
        format!("registry.scans.{}", self.namespace)
    }

    /// Embedding collections carry their dimension so a model change lands
    /// in a fresh collection instead of corrupting the old one.
    pub fn embeddings(&self, dimension: usize) -> String {
        format!("registry.embeddings.{}.d{dimension}", self.namespace)
    }
}
