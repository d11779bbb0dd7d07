use std::collections::HashMap;

use gateway_types::ScopeRecord;

/// Immutable scope lookup table.
///
/// Built once per reload and shared behind an `Arc`; evaluation never
/// mutates it.
#[derive(Debug, Clone, Default)]
pub struct ScopeTable {
    scopes: HashMap<String, ScopeRecord>,
    admin_pattern: String,
}

impl ScopeTable {
    pub fn new(admin_pattern: impl Into<String>) -> Self {
        Self {
            scopes: HashMap::new(),
            admin_pattern: admin_pattern.into(),
        }
    }

    pub fn from_records(
        records: impl IntoIterator<Item = ScopeRecord>,
        admin_pattern: impl Into<String>,
    ) -> Self {
        let mut table = Self::new(admin_pattern);
        for record in records {
            table.insert(record);
        }
        table
    }

    /// Insert or replace a record. Later inserts win on name collisions.
    pub fn insert(&mut self, record: ScopeRecord) {
        self.scopes.insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<&ScopeRecord> {
        self.scopes.get(name)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn admin_pattern(&self) -> &str {
        &self.admin_pattern
    }

    /// Whether a group name carries the synthetic full grant.
    ///
    /// The pattern matches exactly, or as a prefix when it ends with `*`.
    /// This is evaluated before any stored permissions so an admin scope
    /// record cannot demote itself.
    pub fn is_admin_group(&self, group: &str) -> bool {
        if self.admin_pattern.is_empty() {
            return false;
        }
        match self.admin_pattern.strip_suffix('*') {
            Some(prefix) => group.starts_with(prefix),
            None => group == self.admin_pattern,
        }
    }
}
