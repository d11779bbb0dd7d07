//! Shared data model for the MCP registry gateway.
//!
//! This crate defines the entities the gateway registers and serves:
//! - MCP servers (tool-bearing upstreams) and A2A agents (skill-bearing)
//! - scope records granting group-based permissions
//! - security scan records produced at registration time
//! - embedding records backing semantic discovery
//! - health state published by the monitoring supervisor
//!
//! Design stance:
//! - Entities are plain serde structs; behavior lives in the component crates.
//! - Every user-facing failure is one variant of [`RegistryError`].

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod embedding;
mod entity;
mod error;
mod event;
mod health;
mod identity;
mod namespace;
mod scan;
mod scope;

pub use embedding::EmbeddingRecord;
pub use entity::{
    AgentEntity, AuthProviderInfo, Entity, EntityType, Registrable, ServerEntity, SkillRecord,
    ToolAnnotations, ToolRecord, Transport,
};
pub use error::{RegistryError, RegistryResult, TokenReason};
pub use event::{ChangeEvent, ChangeOp};
pub use health::{HealthEvent, HealthRecord, HealthState};
pub use identity::CallerIdentity;
pub use namespace::Namespace;
pub use scan::{FindingSeverity, ScanFinding, ScanId, ScanStatus, SecurityScanRecord};
pub use scope::{methods, Permission, ScopeRecord};
