//! Versioned capability catalog.
//!
//! In-memory index over the slot store, guarded by a single
//! `RwLock`: read-modify-write sequences (`register`, `update_stats`,
//! `deprecate`) take the write lock, plain reads run concurrently.

use super::capability::{Artifact, Capability, CapabilityMetadata, CapabilitySpec, IoSpec};
use super::store::RegistryStore;
use crate::error::RegistryError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Default result cap for `search`.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Ranked search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub metadata: CapabilityMetadata,
}

#[derive(Default)]
struct Index {
    capabilities: HashMap<String, CapabilityMetadata>,
    artifacts: HashMap<String, Artifact>,
    /// Registration order, for stable tie-breaking in search.
    order: Vec<String>,
}

/// Capability registry with filesystem persistence
pub struct CapabilityRegistry {
    store: RegistryStore,
    index: RwLock<Index>,
}

impl CapabilityRegistry {
    /// Open a registry rooted at `path`, reloading every readable slot.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let store = RegistryStore::open(path)?;

        let mut index = Index::default();
        let mut loaded = store.load_all()?;
        loaded.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at));
        for (metadata, artifact) in loaded {
            index.order.push(metadata.id.clone());
            index.artifacts.insert(metadata.id.clone(), artifact);
            index.capabilities.insert(metadata.id.clone(), metadata);
        }

        Ok(Self {
            store,
            index: RwLock::new(index),
        })
    }

    /// Register a capability. The id is `name_version` and is returned
    /// on success; the slot is persisted before the index is updated.
    pub fn register(
        &self,
        artifact: Artifact,
        spec: &CapabilitySpec,
        version: &str,
    ) -> Result<String, RegistryError> {
        let metadata = CapabilityMetadata::from_spec(spec, version);
        let id = metadata.id.clone();

        self.store.save(&id, &metadata, &artifact)?;

        let mut index = self.index.write();
        if !index.capabilities.contains_key(&id) {
            index.order.push(id.clone());
        }
        index.artifacts.insert(id.clone(), artifact);
        index.capabilities.insert(id.clone(), metadata);

        info!(%id, "registered capability");
        Ok(id)
    }

    /// Ranked substring search over name, description and tags.
    ///
    /// Score = 0.5 (name match) + 0.3 (description match) + 0.2 per
    /// matching tag; deprecated entries are never returned and ties
    /// keep registration order. An empty query matches nothing: use
    /// [`CapabilityRegistry::list_all`] to enumerate.
    pub fn search(&self, query: &str, io_spec: Option<&IoSpec>, limit: usize) -> Vec<SearchHit> {
        if query.is_empty() {
            return Vec::new();
        }

        let query_lower = query.to_lowercase();
        let index = self.index.read();

        let mut hits: Vec<SearchHit> = index
            .order
            .iter()
            .filter_map(|id| index.capabilities.get(id))
            .filter(|meta| !meta.deprecated)
            .filter(|meta| io_spec.map_or(true, |spec| io_compatible(spec, &meta.io_spec)))
            .filter_map(|meta| {
                let mut score = 0.0;
                if meta.name.to_lowercase().contains(&query_lower) {
                    score += 0.5;
                }
                if meta.description.to_lowercase().contains(&query_lower) {
                    score += 0.3;
                }
                for tag in &meta.tags {
                    if tag.to_lowercase().contains(&query_lower) {
                        score += 0.2;
                    }
                }

                (score > 0.0).then(|| SearchHit {
                    id: meta.id.clone(),
                    score,
                    metadata: meta.clone(),
                })
            })
            .collect();

        // Stable sort keeps registration order on equal scores
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);

        debug!(query, found = hits.len(), "capability search");
        hits
    }

    /// Fetch a capability by id.
    pub fn get(&self, id: &str) -> Option<Capability> {
        let index = self.index.read();
        let metadata = index.capabilities.get(id)?.clone();
        let artifact = index.artifacts.get(id)?.clone();
        Some(Capability {
            id: id.to_string(),
            metadata,
            artifact,
        })
    }

    /// Fold an execution outcome into the capability's stats and
    /// persist. Returns false when the id is unknown.
    pub fn update_stats(&self, id: &str, success: bool) -> Result<bool, RegistryError> {
        let mut index = self.index.write();

        let Some(metadata) = index.capabilities.get_mut(id) else {
            return Ok(false);
        };
        metadata.record_outcome(success);

        let metadata = metadata.clone();
        let artifact = index.artifacts.get(id).cloned();
        drop(index);

        if let Some(artifact) = artifact {
            self.store.save(id, &metadata, &artifact)?;
        }
        Ok(true)
    }

    /// Mark a capability deprecated. Idempotent; returns false when
    /// the id is unknown. Deprecated entries are excluded from search
    /// but remain retrievable via `get` and `list_all(true)`.
    pub fn deprecate(&self, id: &str, reason: Option<&str>) -> Result<bool, RegistryError> {
        let mut index = self.index.write();

        let Some(metadata) = index.capabilities.get_mut(id) else {
            return Ok(false);
        };

        if !metadata.deprecated {
            metadata.deprecated = true;
            metadata.deprecation_date = Some(chrono::Utc::now().to_rfc3339());
        }

        let metadata = metadata.clone();
        let artifact = index.artifacts.get(id).cloned();
        drop(index);

        if let Some(artifact) = artifact {
            self.store.save(id, &metadata, &artifact)?;
        }

        info!(id, reason = reason.unwrap_or("unspecified"), "deprecated capability");
        Ok(true)
    }

    /// Enumerate capability metadata in registration order.
    pub fn list_all(&self, include_deprecated: bool) -> Vec<CapabilityMetadata> {
        let index = self.index.read();
        index
            .order
            .iter()
            .filter_map(|id| index.capabilities.get(id))
            .filter(|meta| include_deprecated || !meta.deprecated)
            .cloned()
            .collect()
    }

    /// Next monotonic version for a capability name: bumps the patch
    /// component past the highest existing release, starting at 0.1.0.
    pub fn next_version(&self, name: &str) -> String {
        let index = self.index.read();
        let max_patch = index
            .capabilities
            .values()
            .filter(|meta| meta.name == name)
            .filter_map(|meta| meta.version.strip_prefix("0.1."))
            .filter_map(|patch| patch.parse::<u64>().ok())
            .max();

        match max_patch {
            Some(patch) => format!("0.1.{}", patch + 1),
            None => "0.1.0".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().capabilities.is_empty()
    }
}

fn io_compatible(wanted: &IoSpec, offered: &IoSpec) -> bool {
    let side_ok = |w: &str, o: &str| w == "generic" || o == "generic" || w == o;
    side_ok(&wanted.input_type, &offered.input_type)
        && side_ok(&wanted.output_type, &offered.output_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, CapabilityRegistry) {
        let dir = TempDir::new().unwrap();
        let reg = CapabilityRegistry::open(dir.path()).unwrap();
        (dir, reg)
    }

    fn register_named(reg: &CapabilityRegistry, name: &str, description: &str, tags: &[&str]) -> String {
        let mut spec = CapabilitySpec::new(name, description);
        spec.tags = tags.iter().map(|t| t.to_string()).collect();
        let version = reg.next_version(name);
        let artifact = Artifact::python_function(
            format!("def {}(input_data):\n    return input_data\n", name),
            spec.clone(),
            name.to_string(),
        );
        reg.register(artifact, &spec, &version).unwrap()
    }

    #[test]
    fn test_register_then_get_round_trip() {
        let (_dir, reg) = registry();
        let id = register_named(&reg, "parse_json", "Parse a JSON document", &["json"]);
        assert_eq!(id, "parse_json_0.1.0");

        let cap = reg.get(&id).unwrap();
        assert_eq!(cap.metadata.name, "parse_json");
        assert_eq!(cap.metadata.version, "0.1.0");
        assert_eq!(cap.metadata.usage_count, 0);
        assert_eq!(cap.artifact.entry_point, "parse_json");
    }

    #[test]
    fn test_search_scoring_and_ranking() {
        let (_dir, reg) = registry();
        register_named(&reg, "fetch_data", "Download json payloads", &[]);
        register_named(&reg, "json_parser", "Parse documents", &["json"]);

        let hits = reg.search("json", None, DEFAULT_SEARCH_LIMIT);
        assert_eq!(hits.len(), 2);
        // name (0.5) + tag (0.2) beats description (0.3)
        assert_eq!(hits[0].metadata.name, "json_parser");
        assert!((hits[0].score - 0.7).abs() < 1e-9);
        assert!((hits[1].score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_search_excludes_deprecated() {
        let (_dir, reg) = registry();
        let id = register_named(&reg, "old_tool", "old tool for things", &[]);
        assert!(reg.deprecate(&id, Some("superseded")).unwrap());

        assert!(reg.search("old_tool", None, 10).is_empty());
        assert!(reg.list_all(false).is_empty());
        assert_eq!(reg.list_all(true).len(), 1);
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let (_dir, reg) = registry();
        register_named(&reg, "anything", "does anything", &[]);
        assert!(reg.search("", None, 10).is_empty());
        assert_eq!(reg.list_all(false).len(), 1);
    }

    #[test]
    fn test_update_stats_ema_persists() {
        let (dir, reg) = registry();
        let id = register_named(&reg, "flaky", "a flaky capability", &[]);

        assert!(reg.update_stats(&id, false).unwrap());
        assert!(!reg.update_stats("missing_0.1.0", true).unwrap());

        let meta = reg.get(&id).unwrap().metadata;
        assert!((meta.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(meta.usage_count, 1);

        // Survives a reload
        drop(reg);
        let reg = CapabilityRegistry::open(dir.path()).unwrap();
        let meta = reg.get(&id).unwrap().metadata;
        assert!((meta.success_rate - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_deprecate_is_idempotent() {
        let (_dir, reg) = registry();
        let id = register_named(&reg, "tool", "tool", &[]);

        assert!(reg.deprecate(&id, None).unwrap());
        let first_date = reg.get(&id).unwrap().metadata.deprecation_date.clone();
        assert!(reg.deprecate(&id, None).unwrap());
        assert_eq!(reg.get(&id).unwrap().metadata.deprecation_date, first_date);

        assert!(!reg.deprecate("missing", None).unwrap());
    }

    #[test]
    fn test_monotonic_versioning() {
        let (_dir, reg) = registry();
        assert_eq!(reg.next_version("tool"), "0.1.0");
        register_named(&reg, "tool", "v0", &[]);
        assert_eq!(reg.next_version("tool"), "0.1.1");
        register_named(&reg, "tool", "v1", &[]);
        assert_eq!(reg.next_version("tool"), "0.1.2");
    }
}
