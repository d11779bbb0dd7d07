//! JWKS cache keyed by `kid`.
//!
//! Keys are fetched once and reused until the hard TTL expires or an unknown
//! `kid` appears. Refreshes are single-flight: concurrent misses share one
//! outbound fetch instead of stampeding the provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_types::{RegistryError, TokenReason};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::OAuthConfig;

/// Raw JWK as returned by the endpoint; only RSA components are consumed.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Cached key material. `DecodingKey` is not `Clone`, so the raw components
/// are stored and the key is rebuilt per use.
#[derive(Debug, Clone)]
struct CachedJwk {
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

impl CachedJwk {
    fn to_decoding_key(&self) -> Result<DecodingKey, RegistryError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or(RegistryError::TokenInvalid {
                    reason: TokenReason::JwksUnavailable,
                })?;
                let e = self.e.as_deref().ok_or(RegistryError::TokenInvalid {
                    reason: TokenReason::JwksUnavailable,
                })?;
                DecodingKey::from_rsa_components(n, e).map_err(|err| {
                    warn!(error = %err, "failed to build RSA decoding key");
                    RegistryError::TokenInvalid {
                        reason: TokenReason::JwksUnavailable,
                    }
                })
            }
            other => {
                warn!(kty = other, "unsupported JWKS key type");
                Err(RegistryError::TokenInvalid {
                    reason: TokenReason::JwksUnavailable,
                })
            }
        }
    }
}

struct CacheInner {
    keys: HashMap<String, CachedJwk>,
    fetched_at: Option<Instant>,
}

/// JWKS cache with single-flight refresh.
pub struct JwksCache {
    inner: Arc<RwLock<CacheInner>>,
    refresh: Mutex<()>,
    config: OAuthConfig,
    client: reqwest::Client,
}

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

impl JwksCache {
    pub fn new(config: OAuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                keys: HashMap::new(),
                fetched_at: None,
            })),
            refresh: Mutex::new(()),
            config,
            client,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.jwks_ttl_secs)
    }

    /// Decoding key for `kid`, refreshing on miss or expiry.
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, RegistryError> {
        {
            let cache = self.inner.read().await;
            let fresh = cache
                .fetched_at
                .map(|at| at.elapsed() < self.ttl())
                .unwrap_or(false);
            if fresh {
                if let Some(jwk) = cache.keys.get(kid) {
                    return jwk.to_decoding_key();
                }
            }
        }

        self.refresh().await?;

        let cache = self.inner.read().await;
        cache
            .keys
            .get(kid)
            .ok_or_else(|| {
                warn!(kid, "kid not present in refreshed JWKS");
                RegistryError::TokenInvalid {
                    reason: TokenReason::Signature,
                }
            })?
            .to_decoding_key()
    }

    /// Single-flight refresh: a concurrent refresh that already completed is
    /// reused instead of fetching again.
    async fn refresh(&self) -> Result<(), RegistryError> {
        let _flight = self.refresh.lock().await;

        // Another caller may have refreshed while this one waited.
        {
            let cache = self.inner.read().await;
            if let Some(at) = cache.fetched_at {
                if at.elapsed() < Duration::from_secs(1) {
                    return Ok(());
                }
            }
        }

        debug!(url = %self.config.jwks_url, "fetching JWKS");
        let response = self
            .client
            .get(&self.config.jwks_url)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "JWKS fetch failed");
                RegistryError::TokenInvalid {
                    reason: TokenReason::JwksUnavailable,
                }
            })?;

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "JWKS response parse failed");
            RegistryError::TokenInvalid {
                reason: TokenReason::JwksUnavailable,
            }
        })?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if let Some(kid) = &jwk.kid {
                keys.insert(
                    kid.clone(),
                    CachedJwk {
                        kty: jwk.kty.clone(),
                        n: jwk.n.clone(),
                        e: jwk.e.clone(),
                    },
                );
            }
        }

        let mut cache = self.inner.write().await;
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }
}
