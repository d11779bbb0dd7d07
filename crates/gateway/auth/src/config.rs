use serde::{Deserialize, Serialize};

/// Identity-provider parameters for token verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Expected `iss` claim.
    pub issuer: String,
    /// JWKS endpoint of the provider.
    pub jwks_url: String,
    /// Accepted `aud` values; at least one must match.
    pub audiences: Vec<String>,
    /// Claim path holding the caller's groups. Dots descend into nested
    /// objects (`realm_access.roles`).
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,
    /// Leeway applied to `exp` and `nbf`, in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,
    /// Hard TTL of the JWKS cache, in seconds.
    #[serde(default = "default_jwks_ttl")]
    pub jwks_ttl_secs: u64,
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

fn default_clock_skew() -> u64 {
    60
}

fn default_jwks_ttl() -> u64 {
    900
}

impl OAuthConfig {
    pub fn new(
        issuer: impl Into<String>,
        jwks_url: impl Into<String>,
        audiences: Vec<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            jwks_url: jwks_url.into(),
            audiences,
            groups_claim: default_groups_claim(),
            clock_skew_secs: default_clock_skew(),
            jwks_ttl_secs: default_jwks_ttl(),
        }
    }
}
