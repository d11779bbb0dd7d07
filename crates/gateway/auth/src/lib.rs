//! Bearer-token verification against an OIDC identity provider.
//!
//! The gateway never mints tokens; it verifies signatures via the provider's
//! JWKS and extracts `sub`, `preferred_username`, and `groups`. The JWKS
//! fetch is the only network call and is cached by `kid` with single-flight
//! refresh, so verification stays off the request hot path.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod config;
mod jwks;
mod verifier;

pub use config::OAuthConfig;
pub use jwks::JwksCache;
pub use verifier::TokenVerifier;
