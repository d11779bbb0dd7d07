//! Store/index consistency through the synchronizer.

use std::sync::Arc;

use chrono::Utc;
use gateway_backend::MemoryBackend;
use gateway_embeddings::testing::HashEmbedder;
use gateway_index::{spawn_synchronizer, SearchFilter, SyncConfig, VectorIndex};
use gateway_store::RegistryStore;
use gateway_types::{Entity, EntityType, Namespace, ServerEntity, ToolRecord};

const DIM: usize = 64;

fn server(path: &str, description: &str) -> Entity {
    Entity::Server(ServerEntity {
        path: path.to_string(),
        name: "hello".to_string(),
        description: description.to_string(),
        proxy_url: "http://upstream:8080".to_string(),
        supported_transports: Default::default(),
        tags: Default::default(),
        tools: vec![ToolRecord {
            name: "echo".to_string(),
            description: "echoes input".to_string(),
            input_schema: serde_json::json!({}),
            annotations: None,
            tags: Default::default(),
        }],
        version: String::new(),
        is_enabled: true,
        auth_provider_info: None,
        health: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    })
}

struct Fixture {
    store: Arc<RegistryStore>,
    index: Arc<VectorIndex>,
    handle: gateway_index::SyncHandle,
    embedder: Arc<HashEmbedder>,
    ns: Namespace,
}

async fn fixture() -> Fixture {
    let store = Arc::new(RegistryStore::new(Arc::new(MemoryBackend::new()), DIM, 64));
    let ns = Namespace::default();
    store.ensure_namespace(&ns).await.unwrap();

    let embedder = Arc::new(HashEmbedder::new(DIM));
    let index = Arc::new(VectorIndex::new(DIM));
    index
        .rebuild(&store, embedder.as_ref(), &[ns.clone()])
        .await
        .unwrap();
    let handle = spawn_synchronizer(
        Arc::clone(&store),
        embedder.clone(),
        Arc::clone(&index),
        vec![ns.clone()],
        SyncConfig::default(),
    );

    Fixture {
        store,
        index,
        handle,
        embedder,
        ns,
    }
}

async fn drain(fixture: &Fixture) {
    assert!(
        fixture
            .handle
            .wait_for_drain(std::time::Duration::from_secs(5))
            .await,
        "synchronizer did not drain in time"
    );
}

#[tokio::test]
async fn created_entity_is_indexed_with_one_embedding_record() {
    let f = fixture().await;
    f.store
        .create_entity(&f.ns, server("/svc/hello", "greeting service"))
        .await
        .unwrap();
    drain(&f).await;

    assert!(f.index.contains(&f.ns, EntityType::Server, "/svc/hello").await);
    let records = f.store.list_embeddings(&f.ns, None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity_path, "/svc/hello");

    f.handle.abort();
}

#[tokio::test]
async fn description_update_reembeds_and_moves_scores() {
    use gateway_embeddings::Embedder;

    let f = fixture().await;
    f.store
        .create_entity(&f.ns, server("/svc/hello", "greeting sunshine"))
        .await
        .unwrap();
    drain(&f).await;

    let before = f.store.list_embeddings(&f.ns, None).await.unwrap();

    let mut patch = server("/svc/hello", "payment ledger");
    if let Entity::Server(s) = &mut patch {
        s.created_at = Utc::now();
    }
    f.store
        .update_entity(&f.ns, EntityType::Server, "/svc/hello", patch)
        .await
        .unwrap();
    drain(&f).await;

    let after = f.store.list_embeddings(&f.ns, None).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_ne!(before[0].fingerprint, after[0].fingerprint);
    assert!(after[0].text_blob.contains("payment ledger"));

    // Score for the old keyword falls, for the new keyword rises.
    let old_query = f
        .embedder
        .embed(&["sunshine".to_string()])
        .await
        .unwrap()
        .remove(0);
    let new_query = f
        .embedder
        .embed(&["ledger".to_string()])
        .await
        .unwrap()
        .remove(0);
    let old_hits = f
        .index
        .search(&f.ns, EntityType::Server, &old_query, 1, &SearchFilter::default())
        .await;
    let new_hits = f
        .index
        .search(&f.ns, EntityType::Server, &new_query, 1, &SearchFilter::default())
        .await;
    assert!(new_hits[0].score > old_hits[0].score);

    f.handle.abort();
}

#[tokio::test]
async fn delete_removes_index_entry_and_embedding() {
    let f = fixture().await;
    f.store
        .create_entity(&f.ns, server("/svc/hello", "greeting service"))
        .await
        .unwrap();
    drain(&f).await;

    f.store
        .delete_entity(&f.ns, EntityType::Server, "/svc/hello")
        .await
        .unwrap();
    drain(&f).await;

    assert!(!f.index.contains(&f.ns, EntityType::Server, "/svc/hello").await);
    assert!(f.store.list_embeddings(&f.ns, None).await.unwrap().is_empty());

    f.handle.abort();
}

#[tokio::test]
async fn toggle_keeps_entity_discoverable() {
    let f = fixture().await;
    f.store
        .create_entity(&f.ns, server("/svc/hello", "greeting service"))
        .await
        .unwrap();
    drain(&f).await;

    f.store
        .toggle_entity(&f.ns, EntityType::Server, "/svc/hello", false)
        .await
        .unwrap();
    drain(&f).await;

    assert!(f.index.contains(&f.ns, EntityType::Server, "/svc/hello").await);

    use gateway_embeddings::Embedder;
    let query = f
        .embedder
        .embed(&["greeting".to_string()])
        .await
        .unwrap()
        .remove(0);

    let visible = f
        .index
        .search(&f.ns, EntityType::Server, &query, 5, &SearchFilter::default())
        .await;
    assert_eq!(visible.len(), 1);

    let hidden = f
        .index
        .search(
            &f.ns,
            EntityType::Server,
            &query,
            5,
            &SearchFilter {
                enabled_only: true,
                ..Default::default()
            },
        )
        .await;
    assert!(hidden.is_empty());

    f.handle.abort();
}

#[tokio::test]
async fn rebuild_restores_index_from_store() {
    let f = fixture().await;
    f.store
        .create_entity(&f.ns, server("/svc/hello", "greeting service"))
        .await
        .unwrap();
    drain(&f).await;
    f.handle.abort();

    // A fresh process: new index, rebuilt from persisted state only.
    let fresh = VectorIndex::new(DIM);
    fresh
        .rebuild(&f.store, f.embedder.as_ref(), &[f.ns.clone()])
        .await
        .unwrap();
    assert!(fresh.is_ready());
    assert!(fresh.contains(&f.ns, EntityType::Server, "/svc/hello").await);
}
