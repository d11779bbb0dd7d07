//! One in-memory index per `(namespace, entity_type)`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

/// Indexed entry for one entity path.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub path: String,
    pub vector: Vec<f32>,
    pub updated_at: DateTime<Utc>,
    pub enabled: bool,
    pub tags: Vec<String>,
}

/// Search-time restrictions.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    /// Hide disabled entities.
    pub enabled_only: bool,
    /// Restrict to this path subset.
    pub paths: Option<HashSet<String>>,
}

impl SearchFilter {
    fn accepts(&self, entry: &IndexEntry) -> bool {
        if self.enabled_only && !entry.enabled {
            return false;
        }
        if let Some(paths) = &self.paths {
            if !paths.contains(&entry.path) {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|tag| entry.tags.iter().any(|t| t == tag))
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub path: String,
    pub score: f32,
}

#[derive(Debug, Default)]
pub(crate) struct IndexShard {
    entries: HashMap<String, IndexEntry>,
}

impl IndexShard {
    pub(crate) fn upsert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub(crate) fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub(crate) fn set_enabled(&mut self, path: &str, enabled: bool, updated_at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.enabled = enabled;
            entry.updated_at = updated_at;
        }
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Exact cosine top-k with deterministic tie-breaking: score descending,
    /// then `updated_at` descending, then path ascending.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Vec<SearchHit> {
        let mut scored: Vec<(&IndexEntry, f32)> = self
            .entries
            .values()
            .filter(|entry| filter.accepts(entry))
            .filter_map(|entry| cosine(query, &entry.vector).map(|score| (entry, score)))
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.path.cmp(&b.path))
        });
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(entry, score)| SearchHit {
                path: entry.path.clone(),
                score,
            })
            .collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(path: &str, vector: Vec<f32>, minutes_ago: i64) -> IndexEntry {
        IndexEntry {
            path: path.to_string(),
            vector,
            updated_at: Utc::now() - Duration::minutes(minutes_ago),
            enabled: true,
            tags: vec!["demo".to_string()],
        }
    }

    #[test]
    fn ranking_is_deterministic_under_ties() {
        let mut shard = IndexShard::default();
        // Identical vectors: scores tie exactly.
        shard.upsert(entry("/svc/b", vec![1.0, 0.0], 5));
        shard.upsert(entry("/svc/a", vec![1.0, 0.0], 5));
        shard.upsert(entry("/svc/newer", vec![1.0, 0.0], 1));

        for _ in 0..10 {
            let hits = shard.search(&[1.0, 0.0], 3, &SearchFilter::default());
            let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
            // Newest first, then path ascending among equal timestamps.
            assert_eq!(paths[0], "/svc/newer");
            assert_eq!(&paths[1..], &["/svc/a", "/svc/b"]);
        }
    }

    #[test]
    fn filters_restrict_results() {
        let mut shard = IndexShard::default();
        let mut disabled = entry("/svc/off", vec![1.0, 0.0], 0);
        disabled.enabled = false;
        shard.upsert(disabled);
        shard.upsert(entry("/svc/on", vec![1.0, 0.0], 0));

        let all = shard.search(&[1.0, 0.0], 10, &SearchFilter::default());
        assert_eq!(all.len(), 2);

        let enabled_only = shard.search(
            &[1.0, 0.0],
            10,
            &SearchFilter {
                enabled_only: true,
                ..Default::default()
            },
        );
        assert_eq!(enabled_only.len(), 1);
        assert_eq!(enabled_only[0].path, "/svc/on");

        let subset = shard.search(
            &[1.0, 0.0],
            10,
            &SearchFilter {
                paths: Some(["/svc/off".to_string()].into_iter().collect()),
                ..Default::default()
            },
        );
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].path, "/svc/off");
    }

    #[test]
    fn tag_filter_requires_all_tags() {
        let mut shard = IndexShard::default();
        shard.upsert(entry("/svc/a", vec![1.0], 0));
        let filter = SearchFilter {
            tags: vec!["demo".to_string(), "absent".to_string()],
            ..Default::default()
        };
        assert!(shard.search(&[1.0], 10, &filter).is_empty());
    }
}
