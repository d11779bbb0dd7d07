//! Deterministic text-blob construction.
//!
//! The blob is the single string handed to the embedder: name, description,
//! tags, and tool/skill names and descriptions, newline-joined with collapsed
//! whitespace. The same entity always produces the same blob, so the blake3
//! fingerprint decides whether a re-embed is needed.

use gateway_types::{EmbeddingRecord, Registrable};

/// Build the searchable text blob for a registrable.
pub fn text_blob(entity: &dyn Registrable) -> String {
    entity
        .searchable_text()
        .iter()
        .map(|part| normalize(part))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fingerprint a blob for change detection.
pub fn fingerprint(blob: &str) -> String {
    EmbeddingRecord::fingerprint_of(blob)
}

fn normalize(part: &str) -> String {
    part.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gateway_types::{ServerEntity, ToolRecord};

    fn server(description: &str) -> ServerEntity {
        ServerEntity {
            path: "/svc/hello".to_string(),
            name: "hello".to_string(),
            description: description.to_string(),
            proxy_url: "http://upstream".to_string(),
            supported_transports: Default::default(),
            tags: ["demo".to_string(), "alpha".to_string()].into_iter().collect(),
            tools: vec![ToolRecord {
                name: "echo".to_string(),
                description: "echoes   input".to_string(),
                input_schema: serde_json::json!({}),
                annotations: None,
                tags: Default::default(),
            }],
            version: String::new(),
            is_enabled: true,
            auth_provider_info: None,
            health: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn blob_is_deterministic_and_whitespace_normalized() {
        let a = text_blob(&server("greeting  service"));
        let b = text_blob(&server("greeting service"));
        assert_eq!(a, b);
        assert!(a.contains("hello"));
        assert!(a.contains("alpha\ndemo") || a.contains("alpha") && a.contains("demo"));
        assert!(a.contains("echoes input"));
    }

    #[test]
    fn description_change_changes_fingerprint() {
        let before = fingerprint(&text_blob(&server("greeting service")));
        let after = fingerprint(&text_blob(&server("payment service")));
        assert_ne!(before, after);
    }
}
