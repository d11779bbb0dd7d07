use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for gateway operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Why a bearer token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenReason {
    Signature,
    Expired,
    Issuer,
    Audience,
    Malformed,
    JwksUnavailable,
}

impl std::fmt::Display for TokenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenReason::Signature => "signature",
            TokenReason::Expired => "expired",
            TokenReason::Issuer => "issuer",
            TokenReason::Audience => "audience",
            TokenReason::Malformed => "malformed",
            TokenReason::JwksUnavailable => "jwks-unavailable",
        };
        f.write_str(s)
    }
}

/// User-facing error taxonomy.
///
/// Every public operation returns either a snapshot or exactly one of these.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("token invalid: {reason}")]
    TokenInvalid { reason: TokenReason },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("embeddings failed (transient={transient}): {message}")]
    EmbeddingsFailed { transient: bool, message: String },

    #[error("index stale")]
    IndexStale,

    #[error("internal error, correlation id {correlation_id}")]
    Internal { correlation_id: String },
}

impl RegistryError {
    /// Whether an orchestrator-boundary retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::BackendUnavailable(_)
                | RegistryError::EmbeddingsFailed {
                    transient: true,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_reasons_serialize_kebab_case() {
        let json = serde_json::to_string(&TokenReason::JwksUnavailable).unwrap();
        assert_eq!(json, "\"jwks-unavailable\"");
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(RegistryError::BackendUnavailable("down".into()).is_retryable());
        assert!(!RegistryError::EmbeddingsFailed {
            transient: false,
            message: "bad dimension".into()
        }
        .is_retryable());
        assert!(!RegistryError::NotFound("x".into()).is_retryable());
    }
}
