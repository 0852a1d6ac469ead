//! Capability synthesis pipeline.
//!
//! One spec in, one registered capability out (or a typed failure):
//! generate, validate (with a single repair attempt), type-check,
//! package, smoke-test in the sandbox, version and register. Smoke
//! tests run through the same executor production uses, so a
//! capability that cannot run never reaches the registry.

use crate::error::FailureKind;
use crate::llm::LanguageModel;
use crate::registry::{Artifact, CapabilityRegistry, CapabilitySpec, SmokeTest};
use crate::sandbox::{SandboxExecutor, SandboxPolicy};
use crate::synthesis::validator::{StaticValidator, TypeChecker, ValidationFinding};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SynthesisStatus {
    Ready,
    Fail,
}

/// Result of one synthesis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOutcome {
    pub status: SynthesisStatus,
    /// Failure classification, absent when ready
    pub reason: Option<FailureKind>,
    /// Validation findings, blocking or not
    pub findings: Vec<ValidationFinding>,
    /// Registered capability id, present when ready
    pub tool_id: Option<String>,
    pub version: Option<String>,
    /// Packaged artifact (carries the final code), present when ready
    pub artifact: Option<Artifact>,
}

impl SynthesisOutcome {
    fn ready(
        tool_id: String,
        version: String,
        artifact: Artifact,
        findings: Vec<ValidationFinding>,
    ) -> Self {
        Self {
            status: SynthesisStatus::Ready,
            reason: None,
            findings,
            tool_id: Some(tool_id),
            version: Some(version),
            artifact: Some(artifact),
        }
    }

    fn fail(reason: FailureKind, findings: Vec<ValidationFinding>) -> Self {
        Self {
            status: SynthesisStatus::Fail,
            reason: Some(reason),
            findings,
            tool_id: None,
            version: None,
            artifact: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SynthesisStatus::Ready
    }
}

/// Generate-validate-test-register pipeline.
pub struct SynthesisPipeline {
    llm: Option<Arc<dyn LanguageModel>>,
    type_checker: TypeChecker,
    registry: Arc<CapabilityRegistry>,
    sandbox: Arc<SandboxExecutor>,
}

impl SynthesisPipeline {
    pub fn new(
        llm: Option<Arc<dyn LanguageModel>>,
        registry: Arc<CapabilityRegistry>,
        sandbox: Arc<SandboxExecutor>,
    ) -> Self {
        Self {
            llm,
            type_checker: TypeChecker::new(),
            registry,
            sandbox,
        }
    }

    /// Run the full pipeline for `spec`.
    pub async fn create(&self, spec: &CapabilitySpec) -> Result<SynthesisOutcome> {
        // Generate
        let mut code = match &self.llm {
            Some(model) => match model.generate_code(spec).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(name = %spec.name, error = %e, "code generation failed");
                    return Ok(SynthesisOutcome::fail(FailureKind::GenerationFailed, vec![]));
                }
            },
            None => template_code(spec),
        };
        if code.trim().is_empty() {
            return Ok(SynthesisOutcome::fail(FailureKind::GenerationFailed, vec![]));
        }

        // Validate, with one repair attempt on blockers
        let validator = StaticValidator::new(spec.constraints.network_allowed);
        let mut report = validator.validate(&code);
        if report.has_blockers() {
            if let Some(model) = &self.llm {
                let blockers: Vec<ValidationFinding> =
                    report.blockers().into_iter().cloned().collect();
                match model.repair_code(&code, &blockers).await {
                    Ok(repaired) => {
                        code = repaired;
                        report = validator.validate(&code);
                    }
                    Err(e) => warn!(name = %spec.name, error = %e, "repair attempt failed"),
                }
            }
        }
        if report.has_blockers() {
            return Ok(SynthesisOutcome::fail(
                FailureKind::ValidationFailed,
                report.findings,
            ));
        }

        // Type hints are advisory only
        let mut findings = report.findings;
        findings.extend(self.type_checker.check(&code).findings);

        // Package against the declared entry point
        let Some(entry_point) = resolve_entry_point(&code, &spec.name) else {
            return Ok(SynthesisOutcome::fail(FailureKind::GenerationFailed, findings));
        };
        let artifact = Artifact::python_function(code, spec.clone(), entry_point);

        // Smoke-test through the real sandbox
        if let Err(detail) = self.run_smoke_tests(&artifact, spec).await {
            warn!(name = %spec.name, %detail, "smoke tests failed");
            return Ok(SynthesisOutcome::fail(FailureKind::TestsFailed, findings));
        }

        // Version and register
        let version = self.registry.next_version(&spec.name);
        let tool_id = self.registry.register(artifact.clone(), spec, &version)?;

        info!(%tool_id, %version, "capability synthesized");
        Ok(SynthesisOutcome::ready(tool_id, version, artifact, findings))
    }

    async fn run_smoke_tests(
        &self,
        artifact: &Artifact,
        spec: &CapabilitySpec,
    ) -> std::result::Result<(), String> {
        let tests = if spec.tests.is_empty() {
            vec![SmokeTest::basic()]
        } else {
            spec.tests.clone()
        };
        let policy = SandboxPolicy::for_constraints(&spec.constraints);

        for test in &tests {
            let result = self
                .sandbox
                .execute(artifact, &test.input, Some(&policy))
                .await;

            if result.succeeded() != test.expected_success {
                return Err(format!(
                    "{}: expected success={}, got status {:?} ({})",
                    test.name,
                    test.expected_success,
                    result.status,
                    result.error.as_deref().unwrap_or("no error")
                ));
            }

            if let Some(needle) = &test.expected_contains {
                let haystack = result
                    .result
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                if !haystack.contains(needle.as_str()) {
                    return Err(format!("{}: result does not contain {:?}", test.name, needle));
                }
            }
        }
        Ok(())
    }
}

static TOP_LEVEL_DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^def\s+([A-Za-z_]\w*)\s*\(").unwrap());

/// Resolve the entry point: the function named after the spec when it
/// exists, otherwise the first top-level function.
fn resolve_entry_point(code: &str, name: &str) -> Option<String> {
    let mut first = None;
    for caps in TOP_LEVEL_DEF_RE.captures_iter(code) {
        let found = caps[1].to_string();
        if found == name {
            return Some(found);
        }
        first.get_or_insert(found);
    }
    first
}

/// Deterministic fallback used when no language model is configured:
/// a pass-through function matching the result envelope.
fn template_code(spec: &CapabilitySpec) -> String {
    let summary = spec.description.replace("\"\"\"", "");
    format!(
        "def {name}(input_data):\n    \"\"\"{summary}\"\"\"\n    return {{\"status\": \"success\", \"data\": input_data}}\n",
        name = spec.name,
        summary = summary,
    )
}
