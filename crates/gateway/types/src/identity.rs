//! Verified caller identity extracted from a bearer token.

use serde::{Deserialize, Serialize};

/// Identity attached to every inbound operation.
///
/// Produced by the token verifier; the policy engine only consumes `groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl CallerIdentity {
    pub fn new(sub: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            sub: sub.into(),
            preferred_username: None,
            groups,
        }
    }

    /// Display name for audit logs: preferred username when present.
    pub fn display_name(&self) -> &str {
        self.preferred_username.as_deref().unwrap_or(&self.sub)
    }
}
