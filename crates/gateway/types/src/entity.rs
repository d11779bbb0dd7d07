//! Registrable entities: MCP servers and A2A agents.
//!
//! Both share the [`Registrable`] contract consumed by the vector index and
//! the health supervisor; servers expose tools, agents expose skills.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RegistryError;
use crate::health::HealthRecord;

/// The two registrable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Server,
    Agent,
}

impl EntityType {
    /// Storage-layer collection stem (`registry.servers`, `registry.agents`).
    pub fn collection_stem(&self) -> &'static str {
        match self {
            EntityType::Server => "servers",
            EntityType::Agent => "agents",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Server => "server",
            EntityType::Agent => "agent",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transports an upstream supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Stdio,
    StreamableHttp,
    Sse,
}

impl Transport {
    /// Whether health probing for this transport goes over HTTP.
    pub fn is_http(&self) -> bool {
        matches!(self, Transport::StreamableHttp | Transport::Sse)
    }
}

/// Tool annotations (matches the MCP wire shape).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "readOnlyHint", skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(rename = "destructiveHint", skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(rename = "idempotentHint", skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
}

/// A tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Tool name, unique within its server.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Input schema (opaque JSON Schema).
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

/// A skill exposed by an A2A agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

/// Upstream authentication metadata, passed through to proxy clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthProviderInfo {
    pub provider: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// An MCP server registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntity {
    /// URL-safe identity, unique within its namespace.
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Absolute URL of the upstream this entry proxies to.
    pub proxy_url: String,
    #[serde(default)]
    pub supported_transports: BTreeSet<Transport>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub tools: Vec<ToolRecord>,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_provider_info: Option<AuthProviderInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An A2A agent registration. Identical to a server except skills replace tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntity {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub proxy_url: String,
    #[serde(default)]
    pub supported_transports: BTreeSet<Transport>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub skills: Vec<SkillRecord>,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_provider_info: Option<AuthProviderInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// Contract shared by servers and agents.
///
/// The vector index and the health supervisor only see registrables.
pub trait Registrable: Send + Sync {
    fn entity_type(&self) -> EntityType;
    fn path(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn proxy_url(&self) -> &str;
    fn tags(&self) -> &BTreeSet<String>;
    fn supported_transports(&self) -> &BTreeSet<Transport>;
    fn is_enabled(&self) -> bool;
    fn updated_at(&self) -> DateTime<Utc>;

    /// Ordered text fragments feeding the discovery embedding.
    fn searchable_text(&self) -> Vec<String>;
}

impl Registrable for ServerEntity {
    fn entity_type(&self) -> EntityType {
        EntityType::Server
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn proxy_url(&self) -> &str {
        &self.proxy_url
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn supported_transports(&self) -> &BTreeSet<Transport> {
        &self.supported_transports
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn searchable_text(&self) -> Vec<String> {
        let mut parts = vec![self.name.clone(), self.description.clone()];
        parts.extend(self.tags.iter().cloned());
        for tool in &self.tools {
            parts.push(tool.name.clone());
            parts.push(tool.description.clone());
        }
        parts
    }
}

impl Registrable for AgentEntity {
    fn entity_type(&self) -> EntityType {
        EntityType::Agent
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn proxy_url(&self) -> &str {
        &self.proxy_url
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn supported_transports(&self) -> &BTreeSet<Transport> {
        &self.supported_transports
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn searchable_text(&self) -> Vec<String> {
        let mut parts = vec![self.name.clone(), self.description.clone()];
        parts.extend(self.tags.iter().cloned());
        for skill in &self.skills {
            parts.push(skill.name.clone());
            parts.push(skill.description.clone());
        }
        parts
    }
}

/// Either registrable, tagged for storage and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "lowercase")]
pub enum Entity {
    Server(ServerEntity),
    Agent(AgentEntity),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Server(_) => EntityType::Server,
            Entity::Agent(_) => EntityType::Agent,
        }
    }

    pub fn as_registrable(&self) -> &dyn Registrable {
        match self {
            Entity::Server(s) => s,
            Entity::Agent(a) => a,
        }
    }

    pub fn path(&self) -> &str {
        self.as_registrable().path()
    }

    pub fn is_enabled(&self) -> bool {
        self.as_registrable().is_enabled()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Entity::Server(s) => s.is_enabled = enabled,
            Entity::Agent(a) => a.is_enabled = enabled,
        }
    }

    pub fn set_health(&mut self, health: Option<HealthRecord>) {
        match self {
            Entity::Server(s) => s.health = health,
            Entity::Agent(a) => a.health = health,
        }
    }

    pub fn health(&self) -> Option<&HealthRecord> {
        match self {
            Entity::Server(s) => s.health.as_ref(),
            Entity::Agent(a) => a.health.as_ref(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        match self {
            Entity::Server(s) => s.updated_at = now,
            Entity::Agent(a) => a.updated_at = now,
        }
    }

    /// Validate identity, naming, URL, and intra-entity uniqueness rules.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let reg = self.as_registrable();
        validate_path(reg.path())?;
        if reg.name().trim().is_empty() {
            return Err(RegistryError::Invalid("name must not be empty".into()));
        }
        let proxy_url = reg.proxy_url();
        let parsed = Url::parse(proxy_url)
            .map_err(|e| RegistryError::Invalid(format!("proxy_url `{proxy_url}`: {e}")))?;
        if parsed.host_str().is_none() && parsed.scheme() != "stdio" {
            return Err(RegistryError::Invalid(format!(
                "proxy_url `{proxy_url}` has no host"
            )));
        }
        match self {
            Entity::Server(server) => {
                let mut seen = BTreeSet::new();
                for tool in &server.tools {
                    if tool.name.trim().is_empty() {
                        return Err(RegistryError::Invalid("tool name must not be empty".into()));
                    }
                    if !seen.insert(tool.name.as_str()) {
                        return Err(RegistryError::Invalid(format!(
                            "duplicate tool name `{}`",
                            tool.name
                        )));
                    }
                }
            }
            Entity::Agent(agent) => {
                let mut seen = BTreeSet::new();
                for skill in &agent.skills {
                    if skill.id.trim().is_empty() {
                        return Err(RegistryError::Invalid("skill id must not be empty".into()));
                    }
                    if !seen.insert(skill.id.as_str()) {
                        return Err(RegistryError::Invalid(format!(
                            "duplicate skill id `{}`",
                            skill.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<(), RegistryError> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(RegistryError::Invalid(format!(
            "path `{path}` must be non-empty and start with `/`"
        )));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'))
    {
        return Err(RegistryError::Invalid(format!(
            "path `{path}` contains characters outside [A-Za-z0-9_/.-]"
        )));
    }
    Ok(())
}
