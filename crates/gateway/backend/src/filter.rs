//! Predicate language for document listings.
//!
//! Covers equality, set membership, array containment, and conjunction over
//! top-level JSON keys. Backends may push predicates down (Postgres) or
//! evaluate them in process (memory).

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    True,
    /// `doc[field] == value`.
    Eq(String, Value),
    /// `doc[field]` is one of the values.
    In(String, Vec<Value>),
    /// `doc[field]` is an array containing the value.
    Contains(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn all() -> Self {
        Filter::True
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains(field.into(), value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::True => true,
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            Filter::In(field, values) => doc
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            Filter::Contains(field, value) => doc
                .get(field)
                .and_then(Value::as_array)
                .map(|arr| arr.contains(value))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }
}
