use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Tenant namespace. Partitions every collection at the storage layer.
///
/// Namespaces are short ASCII identifiers; collection names are suffixed with
/// the namespace (`registry.servers.<ns>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

const MAX_LEN: usize = 63;

impl Namespace {
    /// Parse and validate a namespace identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, RegistryError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_LEN {
            return Err(RegistryError::Invalid(format!(
                "namespace must be 1..={MAX_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(RegistryError::Invalid(format!(
                "namespace `{raw}` may only contain lowercase ascii, digits, `-` and `_`"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
