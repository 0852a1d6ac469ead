//! Capability type definitions
//!
//! Core data structures for synthesized capabilities: the spec fed
//! into synthesis, the packaged artifact, and the registry metadata.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// EMA smoothing factor for rolling success rate.
pub const SUCCESS_RATE_ALPHA: f64 = 0.1;

/// Input/output contract for a capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSpec {
    pub input_type: String,
    pub output_type: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl Default for IoSpec {
    fn default() -> Self {
        Self {
            input_type: "generic".to_string(),
            output_type: "generic".to_string(),
            constraints: Vec::new(),
        }
    }
}

/// Resource constraints attached to a capability spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Timeout in seconds
    pub timeout_secs: u64,
    /// Memory limit in MB
    pub memory_mb: u64,
    /// Whether network access is allowed
    pub network_allowed: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            memory_mb: 512,
            network_allowed: false,
        }
    }
}

/// Declared smoke test for a capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeTest {
    pub name: String,
    pub input: serde_json::Value,
    /// Expected to execute without error
    #[serde(default = "default_true")]
    pub expected_success: bool,
    /// Substring the serialized result must contain, if any
    #[serde(default)]
    pub expected_contains: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SmokeTest {
    /// Minimal test asserting the capability runs cleanly
    pub fn basic() -> Self {
        Self {
            name: "test_basic".to_string(),
            input: serde_json::json!({}),
            expected_success: true,
            expected_contains: None,
        }
    }
}

/// Specification handed to the synthesis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Capability name (alphanumeric + underscore)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Input/output contract
    #[serde(default)]
    pub io_spec: IoSpec,
    /// Resource constraints
    #[serde(default)]
    pub constraints: Constraints,
    /// Declared smoke tests
    #[serde(default)]
    pub tests: Vec<SmokeTest>,
    /// Searchable tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CapabilitySpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            io_spec: IoSpec::default(),
            constraints: Constraints::default(),
            tests: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// Packaged capability artifact, immutable once produced.
///
/// `entry_point` is the declared function the sandbox runner invokes;
/// the executor never introspects the loaded module for callables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub code: String,
    pub spec: CapabilitySpec,
    pub kind: String,
    pub entry_point: String,
}

impl Artifact {
    pub fn python_function(code: String, spec: CapabilitySpec, entry_point: String) -> Self {
        Self {
            code,
            spec,
            kind: "python_function".to_string(),
            entry_point,
        }
    }
}

/// Registry metadata for a capability.
///
/// `success_rate` and `usage_count` are the only fields mutated after
/// creation (via [`CapabilityMetadata::record_outcome`]); `deprecated`
/// and `deprecation_date` flip once through the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default)]
    pub io_spec: IoSpec,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub network_scopes: Vec<String>,
    #[serde(default)]
    pub fs_scopes: Vec<String>,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit_secs: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub tests: Vec<SmokeTest>,
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default)]
    pub usage_count: u64,
    pub created_at: String,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub deprecation_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_owner() -> String {
    "system".to_string()
}

fn default_cpu_limit() -> u64 {
    30
}

fn default_memory_limit() -> u64 {
    512
}

fn default_success_rate() -> f64 {
    1.0
}

impl CapabilityMetadata {
    /// Build metadata for a freshly synthesized capability.
    /// The id is derived from name + version and never changes.
    pub fn from_spec(spec: &CapabilitySpec, version: &str) -> Self {
        Self {
            id: format!("{}_{}", spec.name, version),
            name: spec.name.clone(),
            version: version.to_string(),
            description: spec.description.clone(),
            owner: default_owner(),
            io_spec: spec.io_spec.clone(),
            dependencies: Vec::new(),
            network_scopes: Vec::new(),
            fs_scopes: Vec::new(),
            cpu_limit_secs: spec.constraints.timeout_secs,
            memory_limit_mb: spec.constraints.memory_mb,
            tests: spec.tests.clone(),
            success_rate: 1.0,
            usage_count: 0,
            created_at: Utc::now().to_rfc3339(),
            deprecated: false,
            deprecation_date: None,
            tags: spec.tags.clone(),
        }
    }

    /// Fold one execution outcome into the rolling success rate and
    /// bump the usage counter.
    pub fn record_outcome(&mut self, success: bool) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = SUCCESS_RATE_ALPHA * outcome + (1.0 - SUCCESS_RATE_ALPHA) * self.success_rate;
        self.usage_count += 1;
    }
}

/// Full registry view of a capability: metadata plus artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub metadata: CapabilityMetadata,
    pub artifact: Artifact,
}

impl Capability {
    pub fn code(&self) -> &str {
        &self.artifact.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_derived_from_name_and_version() {
        let spec = CapabilitySpec::new("parse_json", "Parse a JSON document");
        let meta = CapabilityMetadata::from_spec(&spec, "0.1.0");
        assert_eq!(meta.id, "parse_json_0.1.0");
        assert_eq!(meta.success_rate, 1.0);
        assert_eq!(meta.usage_count, 0);
    }

    #[test]
    fn test_record_outcome_ema() {
        let spec = CapabilitySpec::new("t", "t");
        let mut meta = CapabilityMetadata::from_spec(&spec, "0.1.0");

        meta.record_outcome(false);
        assert!((meta.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(meta.usage_count, 1);

        meta.record_outcome(true);
        assert!((meta.success_rate - (0.1 + 0.9 * 0.9)).abs() < 1e-9);
        assert_eq!(meta.usage_count, 2);
    }

    #[test]
    fn test_metadata_round_trip() {
        let spec = CapabilitySpec::new("demo", "A demo capability");
        let meta = CapabilityMetadata::from_spec(&spec, "0.1.0");

        let json = serde_json::to_string(&meta).unwrap();
        let back: CapabilityMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, meta.id);
        assert_eq!(back.version, "0.1.0");
        assert!(!back.deprecated);
    }
}
