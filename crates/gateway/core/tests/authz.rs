//! Scope-gated operations and proxied-call authorization.

mod common;

use common::{admin, hello_server, reader, reader_scope, test_gateway};
use gateway_core::WriteOptions;
use gateway_scopes::{Decision, DenyReason};
use gateway_types::{CallerIdentity, Entity, EntityType, RegistryError};

async fn gateway_with_reader_scope() -> gateway_core::Gateway {
    let gateway = test_gateway().await;
    let ns = gateway.default_namespace().clone();
    gateway
        .store()
        .put_scope(&ns, reader_scope())
        .await
        .unwrap();
    // The scope watcher reloads asynchronously; wait until it lands.
    for _ in 0..100 {
        let decision = gateway
            .authorize_call(&reader(), "/svc/hello", "list", None)
            .await;
        if decision.is_allowed() {
            return gateway;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("scope watcher never loaded the reader scope");
}

#[tokio::test]
async fn listed_method_allows_and_unlisted_tool_denies() {
    let gateway = gateway_with_reader_scope().await;

    let allowed = gateway
        .authorize_call(&reader(), "/svc/hello", "list", None)
        .await;
    assert!(allowed.is_allowed());

    let denied = gateway
        .authorize_call(&reader(), "/svc/hello", "invoke", Some("echo"))
        .await;
    assert_eq!(
        denied,
        Decision::Deny {
            reason: DenyReason::ToolExcluded
        }
    );

    gateway.shutdown().await;
}

#[tokio::test]
async fn admin_mutates_and_non_admin_is_forbidden() {
    let gateway = gateway_with_reader_scope().await;
    let ns = gateway.default_namespace().clone();

    // Admin performs the full lifecycle.
    gateway
        .register_entity(&ns, hello_server(), &admin(), WriteOptions::default())
        .await
        .unwrap();
    let mut patched = hello_server();
    if let Entity::Server(server) = &mut patched {
        server.description = "updated".to_string();
    }
    gateway
        .update_entity(
            &ns,
            EntityType::Server,
            "/svc/hello",
            patched,
            &admin(),
            WriteOptions::default(),
        )
        .await
        .unwrap();
    gateway
        .toggle_entity(&ns, EntityType::Server, "/svc/hello", false, &admin())
        .await
        .unwrap();

    // The reader can fetch but not mutate.
    gateway
        .get_entity(&ns, EntityType::Server, "/svc/hello", &reader())
        .await
        .unwrap();
    let err = gateway
        .toggle_entity(&ns, EntityType::Server, "/svc/hello", true, &reader())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Forbidden(_)));
    let err = gateway
        .delete_entity(&ns, EntityType::Server, "/svc/hello", &reader())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Forbidden(_)));

    gateway
        .delete_entity(&ns, EntityType::Server, "/svc/hello", &admin())
        .await
        .unwrap();

    gateway.shutdown().await;
}

#[tokio::test]
async fn reads_are_filtered_to_listable_entities() {
    let gateway = gateway_with_reader_scope().await;
    let ns = gateway.default_namespace().clone();

    gateway
        .register_entity(&ns, hello_server(), &admin(), WriteOptions::default())
        .await
        .unwrap();
    let mut other = hello_server();
    if let Entity::Server(server) = &mut other {
        server.path = "/svc/private".to_string();
        server.name = "private".to_string();
    }
    gateway
        .register_entity(&ns, other, &admin(), WriteOptions::default())
        .await
        .unwrap();

    let visible = gateway
        .list_entities(
            &ns,
            EntityType::Server,
            &Default::default(),
            &reader(),
            None,
            0,
        )
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].path(), "/svc/hello");

    let err = gateway
        .get_entity(&ns, EntityType::Server, "/svc/private", &reader())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Forbidden(_)));

    gateway.shutdown().await;
}

#[tokio::test]
async fn caller_without_groups_is_denied_with_reason() {
    let gateway = test_gateway().await;
    let nobody = CallerIdentity::new("nobody", vec![]);

    let decision = gateway
        .authorize_call(&nobody, "/svc/hello", "list", None)
        .await;
    assert_eq!(
        decision,
        Decision::Deny {
            reason: DenyReason::NoGroups
        }
    );

    gateway.shutdown().await;
}
