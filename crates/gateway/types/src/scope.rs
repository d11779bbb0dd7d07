//! Scope records: named permission grants keyed by group membership.

use serde::{Deserialize, Serialize};

/// Well-known method names used in permission entries.
///
/// The method set is open; these constants cover the gateway's own surface.
pub mod methods {
    pub const INVOKE: &str = "invoke";
    pub const LIST: &str = "list";
    pub const ADMIN: &str = "admin";

    /// Wildcard accepted in `server`, `methods`, and `tools`.
    pub const WILDCARD: &str = "*";
}

/// One grant inside a scope record.
///
/// `*` in `server` or `tools` means "all"; an absent tool list means
/// "no tools" rather than "any tool".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Service path this entry applies to, or `*`.
    pub server: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Permission {
    /// The synthetic full grant attached to administrative groups.
    pub fn full_grant() -> Self {
        Self {
            server: methods::WILDCARD.to_string(),
            methods: vec![methods::WILDCARD.to_string()],
            tools: vec![methods::WILDCARD.to_string()],
        }
    }
}

/// A named set of permissions granted by membership in the same-named group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRecord {
    /// Scope (and group) name, e.g. `mcp-servers-unrestricted/read`.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_defaults_deserialize_empty() {
        let p: Permission = serde_json::from_str(r#"{"server": "/svc/a"}"#).unwrap();
        assert!(p.methods.is_empty());
        assert!(p.tools.is_empty());
    }

    #[test]
    fn full_grant_is_all_wildcards() {
        let p = Permission::full_grant();
        assert_eq!(p.server, "*");
        assert_eq!(p.methods, vec!["*"]);
        assert_eq!(p.tools, vec!["*"]);
    }
}
