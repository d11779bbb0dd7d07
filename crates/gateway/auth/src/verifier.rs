//! Token verification and claims extraction.

use std::sync::Arc;

use gateway_types::{CallerIdentity, RegistryError, TokenReason};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::jwks::JwksCache;

/// Source of decoding keys: the JWKS cache, or a static key for tests.
enum KeySource {
    Jwks(Arc<JwksCache>),
    Static(DecodingKey),
}

/// Verifies bearer tokens and extracts the caller identity.
pub struct TokenVerifier {
    key_source: KeySource,
    config: OAuthConfig,
}

impl TokenVerifier {
    /// Verifier backed by a JWKS cache.
    pub fn new(jwks: Arc<JwksCache>, config: OAuthConfig) -> Self {
        Self {
            key_source: KeySource::Jwks(jwks),
            config,
        }
    }

    /// Verifier with a static decoding key; bypasses JWKS entirely.
    pub fn with_static_key(key: DecodingKey, config: OAuthConfig) -> Self {
        Self {
            key_source: KeySource::Static(key),
            config,
        }
    }

    /// Verify a token and return the caller identity.
    ///
    /// Checks signature, `iss`, `aud` (any match), `exp` and `nbf` with the
    /// configured skew, then extracts `sub`, `preferred_username`, and the
    /// configured groups claim.
    pub async fn verify(&self, token: &str) -> Result<CallerIdentity, RegistryError> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "token header decode failed");
            RegistryError::TokenInvalid {
                reason: TokenReason::Malformed,
            }
        })?;

        let decoding_key = match &self.key_source {
            KeySource::Static(key) => key.clone(),
            KeySource::Jwks(jwks) => {
                let kid = header.kid.as_deref().ok_or(RegistryError::TokenInvalid {
                    reason: TokenReason::Malformed,
                })?;
                jwks.get_key(kid).await?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.config.issuer]);
        let audiences: Vec<&str> = self.config.audiences.iter().map(String::as_str).collect();
        validation.set_audience(&audiences);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = self.config.clock_skew_secs;

        let token_data = decode::<Value>(token, &decoding_key, &validation).map_err(|e| {
            let reason = match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenReason::Expired,
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => TokenReason::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => TokenReason::Issuer,
                jsonwebtoken::errors::ErrorKind::InvalidAudience => TokenReason::Audience,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenReason::Signature,
                _ => TokenReason::Malformed,
            };
            warn!(reason = %reason, "token validation failed");
            RegistryError::TokenInvalid { reason }
        })?;

        let claims = token_data.claims;
        let sub = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or(RegistryError::TokenInvalid {
                reason: TokenReason::Malformed,
            })?
            .to_string();

        let preferred_username = claims
            .get("preferred_username")
            .and_then(Value::as_str)
            .map(String::from);

        let groups = extract_groups(&claims, &self.config.groups_claim);

        debug!(sub = %sub, groups = groups.len(), "token verified");
        Ok(CallerIdentity {
            sub,
            preferred_username,
            groups,
        })
    }
}

/// Walk a dotted claim path and coerce the value into a group list.
/// A missing claim yields no groups rather than an error.
fn extract_groups(claims: &Value, claim_path: &str) -> Vec<String> {
    let mut current = claims;
    for segment in claim_path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }
    match current {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Value::String(single) => vec![single.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &[u8] = b"test-secret";

    fn config() -> OAuthConfig {
        OAuthConfig::new(
            "https://idp.example.com/realms/mcp",
            "https://idp.example.com/realms/mcp/protocol/openid-connect/certs",
            vec!["mcp-gateway".to_string()],
        )
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::with_static_key(DecodingKey::from_secret(SECRET), config())
    }

    fn mint(claims: Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn base_claims() -> Value {
        let now = unix_now();
        json!({
            "iss": "https://idp.example.com/realms/mcp",
            "aud": "mcp-gateway",
            "sub": "alice",
            "preferred_username": "alice@example.com",
            "groups": ["mcp-servers-restricted/read"],
            "exp": now + 600,
            "nbf": now - 10,
        })
    }

    fn unix_now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn reason_of(err: RegistryError) -> TokenReason {
        match err {
            RegistryError::TokenInvalid { reason } => reason,
            other => panic!("expected TokenInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let identity = verifier().verify(&mint(base_claims())).await.unwrap();
        assert_eq!(identity.sub, "alice");
        assert_eq!(
            identity.preferred_username.as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(identity.groups, vec!["mcp-servers-restricted/read"]);
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let mut token = mint(base_claims());
        // Flip a character in the signature segment.
        let flipped = if token.ends_with('A') { 'B' } else { 'A' };
        token.pop();
        token.push(flipped);
        let reason = reason_of(verifier().verify(&token).await.unwrap_err());
        assert_eq!(reason, TokenReason::Signature);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let mut claims = base_claims();
        claims["exp"] = json!(unix_now() - 3600);
        let reason = reason_of(verifier().verify(&mint(claims)).await.unwrap_err());
        assert_eq!(reason, TokenReason::Expired);
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let mut claims = base_claims();
        claims["iss"] = json!("https://evil.example.com");
        let reason = reason_of(verifier().verify(&mint(claims)).await.unwrap_err());
        assert_eq!(reason, TokenReason::Issuer);
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let mut claims = base_claims();
        claims["aud"] = json!("other-service");
        let reason = reason_of(verifier().verify(&mint(claims)).await.unwrap_err());
        assert_eq!(reason, TokenReason::Audience);
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let reason = reason_of(verifier().verify("not-a-jwt").await.unwrap_err());
        assert_eq!(reason, TokenReason::Malformed);
    }

    #[tokio::test]
    async fn missing_sub_is_malformed() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("sub");
        let reason = reason_of(verifier().verify(&mint(claims)).await.unwrap_err());
        assert_eq!(reason, TokenReason::Malformed);
    }

    #[test]
    fn groups_claim_walks_dotted_paths() {
        let claims = json!({
            "realm_access": {"roles": ["ops", "readers"]}
        });
        assert_eq!(
            extract_groups(&claims, "realm_access.roles"),
            vec!["ops", "readers"]
        );
        assert!(extract_groups(&claims, "groups").is_empty());
        assert_eq!(
            extract_groups(&json!({"groups": "single"}), "groups"),
            vec!["single"]
        );
    }
}
