//! Pure evaluation of access requests against a scope table.

use std::sync::Arc;

use gateway_types::{methods, CallerIdentity, Permission};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::table::ScopeTable;

/// One operation to authorize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest<'a> {
    pub service_path: &'a str,
    pub method: &'a str,
    pub tool: Option<&'a str>,
}

impl<'a> AccessRequest<'a> {
    pub fn new(service_path: &'a str, method: &'a str) -> Self {
        Self {
            service_path,
            method,
            tool: None,
        }
    }

    pub fn with_tool(mut self, tool: &'a str) -> Self {
        self.tool = Some(tool);
        self
    }
}

/// Machine-readable denial reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    NoGroups,
    NoMatchingServer,
    MethodExcluded,
    ToolExcluded,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::NoGroups => "no-groups",
            DenyReason::NoMatchingServer => "no-matching-server",
            DenyReason::MethodExcluded => "method-excluded",
            DenyReason::ToolExcluded => "tool-excluded",
        };
        f.write_str(s)
    }
}

/// Authorization outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny { reason: DenyReason },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// How far a permission entry got before failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchStage {
    Nothing,
    Server,
    Method,
}

fn matches_server(permission: &Permission, path: &str) -> bool {
    permission.server == methods::WILDCARD || permission.server == path
}

fn matches_method(permission: &Permission, method: &str) -> bool {
    permission
        .methods
        .iter()
        .any(|m| m == methods::WILDCARD || m == method)
}

fn matches_tool(permission: &Permission, tool: &str) -> bool {
    permission
        .tools
        .iter()
        .any(|t| t == methods::WILDCARD || t == tool)
}

/// Evaluate a request against the table for a caller's groups.
///
/// Linear in groups x permissions. Forward references (scopes naming servers
/// that do not exist) are fine: an unmatched server simply denies.
pub fn evaluate(table: &ScopeTable, groups: &[String], request: &AccessRequest<'_>) -> Decision {
    if groups.is_empty() {
        return Decision::Deny {
            reason: DenyReason::NoGroups,
        };
    }

    if groups.iter().any(|g| table.is_admin_group(g)) {
        return Decision::Allow;
    }

    let mut best = MatchStage::Nothing;
    for group in groups {
        let Some(scope) = table.get(group) else {
            continue;
        };
        for permission in &scope.permissions {
            if !matches_server(permission, request.service_path) {
                continue;
            }
            best = best.max(MatchStage::Server);
            if !matches_method(permission, request.method) {
                continue;
            }
            best = best.max(MatchStage::Method);
            match request.tool {
                None => return Decision::Allow,
                Some(tool) => {
                    if matches_tool(permission, tool) {
                        return Decision::Allow;
                    }
                }
            }
        }
    }

    let reason = match best {
        MatchStage::Nothing => DenyReason::NoMatchingServer,
        MatchStage::Server => DenyReason::MethodExcluded,
        MatchStage::Method => DenyReason::ToolExcluded,
    };
    Decision::Deny { reason }
}

/// Evaluator service holding the current table snapshot.
///
/// Readers clone an `Arc` under a read lock; the watcher swaps the whole
/// table on reload.
pub struct ScopeEngine {
    table: RwLock<Arc<ScopeTable>>,
}

impl ScopeEngine {
    pub fn new(table: ScopeTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Current copy-on-write snapshot.
    pub async fn snapshot(&self) -> Arc<ScopeTable> {
        self.table.read().await.clone()
    }

    /// Swap in a freshly loaded table.
    pub async fn replace(&self, table: ScopeTable) {
        let mut guard = self.table.write().await;
        *guard = Arc::new(table);
    }

    /// Authorize and audit-log the decision.
    pub async fn authorize(
        &self,
        identity: &CallerIdentity,
        request: &AccessRequest<'_>,
    ) -> Decision {
        let table = self.snapshot().await;
        let decision = evaluate(&table, &identity.groups, request);
        match &decision {
            Decision::Allow => {
                debug!(
                    sub = %identity.sub,
                    service = %request.service_path,
                    method = %request.method,
                    tool = ?request.tool,
                    "authorized"
                );
            }
            Decision::Deny { reason } => {
                warn!(
                    sub = %identity.sub,
                    service = %request.service_path,
                    method = %request.method,
                    tool = ?request.tool,
                    reason = ?reason,
                    "denied"
                );
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::ScopeRecord;

    fn table_with(permissions: Vec<Permission>) -> ScopeTable {
        ScopeTable::from_records(
            [ScopeRecord {
                name: "mcp-servers-restricted/read".to_string(),
                description: String::new(),
                permissions,
            }],
            "mcp-registry-admin",
        )
    }

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_groups_denies_with_reason() {
        let table = table_with(vec![Permission::full_grant()]);
        let decision = evaluate(&table, &[], &AccessRequest::new("/svc/hello", "list"));
        assert_eq!(
            decision,
            Decision::Deny {
                reason: DenyReason::NoGroups
            }
        );
    }

    #[test]
    fn listed_method_allows_but_unlisted_tool_is_excluded() {
        let table = table_with(vec![Permission {
            server: "/svc/hello".to_string(),
            methods: vec!["list".to_string(), "invoke".to_string()],
            tools: vec!["search".to_string()],
        }]);
        let groups = groups(&["mcp-servers-restricted/read"]);

        let listed = evaluate(&table, &groups, &AccessRequest::new("/svc/hello", "list"));
        assert!(listed.is_allowed());

        let denied = evaluate(
            &table,
            &groups,
            &AccessRequest::new("/svc/hello", "invoke").with_tool("echo"),
        );
        assert_eq!(
            denied,
            Decision::Deny {
                reason: DenyReason::ToolExcluded
            }
        );
    }

    #[test]
    fn unmatched_server_and_method_report_their_stage() {
        let table = table_with(vec![Permission {
            server: "/svc/hello".to_string(),
            methods: vec!["list".to_string()],
            tools: vec![],
        }]);
        let groups = groups(&["mcp-servers-restricted/read"]);

        assert_eq!(
            evaluate(&table, &groups, &AccessRequest::new("/svc/other", "list")),
            Decision::Deny {
                reason: DenyReason::NoMatchingServer
            }
        );
        assert_eq!(
            evaluate(&table, &groups, &AccessRequest::new("/svc/hello", "admin")),
            Decision::Deny {
                reason: DenyReason::MethodExcluded
            }
        );
    }

    #[test]
    fn wildcards_cover_everything() {
        let table = table_with(vec![Permission::full_grant()]);
        let groups = groups(&["mcp-servers-restricted/read"]);
        let decision = evaluate(
            &table,
            &groups,
            &AccessRequest::new("/any/path", "invoke").with_tool("anything"),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn admin_group_is_synthetic_and_unconditional() {
        // Note the table holds no record at all for the admin group.
        let table = ScopeTable::new("mcp-registry-admin");
        let decision = evaluate(
            &table,
            &groups(&["mcp-registry-admin"]),
            &AccessRequest::new("/svc/hello", "admin").with_tool("echo"),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn forward_references_deny_gracefully() {
        let table = table_with(vec![Permission {
            server: "/svc/not-registered-yet".to_string(),
            methods: vec!["list".to_string()],
            tools: vec![],
        }]);
        let decision = evaluate(
            &table,
            &groups(&["mcp-servers-restricted/read"]),
            &AccessRequest::new("/svc/exists", "list"),
        );
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn engine_swaps_snapshots_atomically() {
        let engine = ScopeEngine::new(ScopeTable::new("mcp-registry-admin"));
        let identity = CallerIdentity::new("alice", vec!["readers".to_string()]);
        let request = AccessRequest::new("/svc/hello", "list");

        assert!(!engine.authorize(&identity, &request).await.is_allowed());

        engine
            .replace(ScopeTable::from_records(
                [ScopeRecord {
                    name: "readers".to_string(),
                    description: String::new(),
                    permissions: vec![Permission {
                        server: "/svc/hello".to_string(),
                        methods: vec!["list".to_string()],
                        tools: vec![],
                    }],
                }],
                "mcp-registry-admin",
            ))
            .await;

        assert!(engine.authorize(&identity, &request).await.is_allowed());
    }
}
