//! Core orchestrator for the MCP registry gateway.
//!
//! Wires the backend driver, entity store, embeddings client, vector index,
//! scope engine, token verifier, and health supervisor into one embeddable
//! object, [`Gateway`]. The external termination layer (HTTP/MCP) converts
//! requests into calls on it; this crate exposes no routes of its own.
//!
//! Construction is an explicit dependency graph: every component receives
//! its collaborators at build time, and downstream components communicate
//! through channels rather than calling back into the orchestrator.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod config;
mod gateway;
mod scan;

pub use config::{
    BackendConfig, BackendKind, GatewayConfig, IndexConfig, ScansConfig, ScopesConfig,
};
pub use gateway::{Gateway, GatewayBuilder, MutationOutcome, SearchResult, WriteOptions};
pub use scan::ScanJob;
