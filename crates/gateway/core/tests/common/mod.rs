//! Shared fixture for orchestrator tests: memory backend, hash embedder,
//! always-healthy prober.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gateway_backend::MemoryBackend;
use gateway_core::{Gateway, GatewayConfig};
use gateway_embeddings::testing::HashEmbedder;
use gateway_embeddings::{EmbeddingsConfig, EmbeddingsProvider};
use gateway_health::{ProbeTarget, Prober};
use gateway_types::{
    CallerIdentity, Entity, Permission, ScopeRecord, ServerEntity, ToolRecord, Transport,
};

pub const DIM: usize = 64;

pub struct AlwaysUp;

#[async_trait]
impl Prober for AlwaysUp {
    async fn probe(&self, _target: &ProbeTarget) -> bool {
        true
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        embeddings: EmbeddingsConfig {
            provider: EmbeddingsProvider::RemoteOpenaiCompatible,
            model_name: "hash-embedder".to_string(),
            expected_dimension: DIM,
            api_base: None,
            api_key: None,
        },
        ..Default::default()
    }
}

pub async fn test_gateway() -> Gateway {
    Gateway::builder(test_config())
        .with_backend(Arc::new(MemoryBackend::new()))
        .with_embedder(Arc::new(HashEmbedder::new(DIM)))
        .with_prober(Arc::new(AlwaysUp))
        .build()
        .await
        .expect("gateway should build")
}

pub fn admin() -> CallerIdentity {
    CallerIdentity::new("admin", vec!["mcp-registry-admin".to_string()])
}

pub fn reader() -> CallerIdentity {
    CallerIdentity::new("reader", vec!["mcp-servers-restricted/read".to_string()])
}

pub fn reader_scope() -> ScopeRecord {
    ScopeRecord {
        name: "mcp-servers-restricted/read".to_string(),
        description: "read access to the hello service".to_string(),
        permissions: vec![Permission {
            server: "/svc/hello".to_string(),
            methods: vec!["list".to_string(), "invoke".to_string()],
            tools: vec!["search".to_string()],
        }],
    }
}

pub fn hello_server() -> Entity {
    Entity::Server(ServerEntity {
        path: "/svc/hello".to_string(),
        name: "hello".to_string(),
        description: "a friendly greeting service".to_string(),
        proxy_url: "https://hello.internal:8443".to_string(),
        supported_transports: [Transport::StreamableHttp].into_iter().collect(),
        tags: ["demo".to_string()].into_iter().collect(),
        tools: vec![ToolRecord {
            name: "echo".to_string(),
            description: "echoes the input back".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            annotations: None,
            tags: Default::default(),
        }],
        version: "1.0.0".to_string(),
        is_enabled: true,
        auth_provider_info: None,
        health: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    })
}
