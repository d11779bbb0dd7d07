//! Property: permissions are monotone. Adding a grant never revokes access;
//! removing one never widens it.

use gateway_scopes::{AccessRequest, ScopeTable};
use gateway_types::{Permission, ScopeRecord};
use proptest::prelude::*;

const SERVERS: &[&str] = &["/svc/a", "/svc/b", "/svc/c", "*"];
const METHODS: &[&str] = &["list", "invoke", "admin", "*"];
const TOOLS: &[&str] = &["echo", "search", "fetch", "*"];
const GROUPS: &[&str] = &["readers", "writers", "ops"];

fn permission_strategy() -> impl Strategy<Value = Permission> {
    (
        proptest::sample::select(SERVERS.to_vec()),
        proptest::collection::vec(proptest::sample::select(METHODS.to_vec()), 0..3),
        proptest::collection::vec(proptest::sample::select(TOOLS.to_vec()), 0..3),
    )
        .prop_map(|(server, methods, tools)| Permission {
            server: server.to_string(),
            methods: methods.into_iter().map(String::from).collect(),
            tools: tools.into_iter().map(String::from).collect(),
        })
}

fn scope_strategy() -> impl Strategy<Value = ScopeRecord> {
    (
        proptest::sample::select(GROUPS.to_vec()),
        proptest::collection::vec(permission_strategy(), 0..4),
    )
        .prop_map(|(name, permissions)| ScopeRecord {
            name: name.to_string(),
            description: String::new(),
            permissions,
        })
}

fn table_strategy() -> impl Strategy<Value = Vec<ScopeRecord>> {
    proptest::collection::vec(scope_strategy(), 0..4)
}

fn request_strategy() -> impl Strategy<Value = (String, String, Option<String>)> {
    (
        proptest::sample::select(vec!["/svc/a", "/svc/b", "/svc/c", "/svc/unknown"]),
        proptest::sample::select(vec!["list", "invoke", "admin"]),
        proptest::option::of(proptest::sample::select(vec!["echo", "search", "missing"])),
    )
        .prop_map(|(s, m, t)| (s.to_string(), m.to_string(), t.map(String::from)))
}

fn caller_groups_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(proptest::sample::select(GROUPS.to_vec()), 0..3)
        .prop_map(|gs| gs.into_iter().map(String::from).collect())
}

fn build_table(records: &[ScopeRecord]) -> ScopeTable {
    ScopeTable::from_records(records.iter().cloned(), "mcp-registry-admin")
}

proptest! {
    #[test]
    fn adding_a_permission_never_revokes(
        records in table_strategy(),
        extra in permission_strategy(),
        groups in caller_groups_strategy(),
        (service, method, tool) in request_strategy(),
        target_idx in 0usize..4,
    ) {
        prop_assume!(!records.is_empty());
        let target_idx = target_idx % records.len();

        let request = AccessRequest {
            service_path: &service,
            method: &method,
            tool: tool.as_deref(),
        };

        let before = gateway_scopes::evaluate(&build_table(&records), &groups, &request);

        let mut widened = records.clone();
        widened[target_idx].permissions.push(extra);
        let after = gateway_scopes::evaluate(&build_table(&widened), &groups, &request);

        if before.is_allowed() {
            prop_assert!(after.is_allowed(), "adding a permission revoked access");
        }
    }

    #[test]
    fn removing_a_permission_never_grants(
        records in table_strategy(),
        groups in caller_groups_strategy(),
        (service, method, tool) in request_strategy(),
        target_idx in 0usize..4,
    ) {
        prop_assume!(records.iter().any(|r| !r.permissions.is_empty()));

        let request = AccessRequest {
            service_path: &service,
            method: &method,
            tool: tool.as_deref(),
        };

        let before = gateway_scopes::evaluate(&build_table(&records), &groups, &request);

        let mut narrowed = records.clone();
        let candidates: Vec<usize> = narrowed
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.permissions.is_empty())
            .map(|(i, _)| i)
            .collect();
        let victim = candidates[target_idx % candidates.len()];
        narrowed[victim].permissions.pop();
        let after = gateway_scopes::evaluate(&build_table(&narrowed), &groups, &request);

        if !before.is_allowed() {
            prop_assert!(!after.is_allowed(), "removing a permission granted access");
        }
    }
}
