//! Request controller.
//!
//! Drives one request through the full lifecycle: plan, select or
//! design a capability, execute it sandboxed, verify the result, then
//! respond, or learn and retry. Retries are a bounded loop inside
//! `handle_request`; once the ceiling is hit the caller gets a
//! degraded response and further calls for the same task short-circuit
//! without re-running the pipeline.
//!
//! The only user-visible outcomes are success, degraded and error.

use crate::agent::planner::{Plan, Planner, ESCALATION_THRESHOLD};
use crate::agent::reflection::ReflexionMemory;
use crate::agent::state::{AgentState, ContextManager, FeedbackEntry, StateKind};
use crate::config::Config;
use crate::error::FailureKind;
use crate::llm::LanguageModel;
use crate::metrics::MetricsCollector;
use crate::registry::{Capability, CapabilityRegistry, CapabilitySpec, SmokeTest, DEFAULT_SEARCH_LIMIT};
use crate::sandbox::{ExecutionStatus, SandboxExecutor, SandboxPolicy};
use crate::synthesis::SynthesisPipeline;
use crate::verify::{sanitize_output, ResultValidator};
use anyhow::{anyhow, Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Number of reflexion episodes folded into planning context.
const REFLEXION_CONTEXT_LEN: usize = 3;

/// Incoming task request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub task: String,
    #[serde(default)]
    pub args: Value,
}

impl Request {
    pub fn new(task: &str, args: Value) -> Self {
        Self {
            task: task.to_string(),
            args,
        }
    }
}

/// Per-response bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub retries: u32,
    pub state_history: Vec<String>,
    pub duration_ms: u64,
}

/// The three user-visible outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Success {
        result: Value,
        tool_used: String,
        metadata: ResponseMetadata,
    },
    Degraded {
        message: String,
        feedback: Vec<FeedbackEntry>,
        partial_result: Option<Value>,
    },
    Error {
        error: String,
        message: String,
    },
}

enum Designed {
    Ready(Capability),
    Failed { kind: FailureKind, details: Value },
}

enum AttemptOutcome {
    Success {
        result: Value,
        tool_id: String,
    },
    Failed {
        kind: FailureKind,
        details: Value,
        partial: Option<Value>,
    },
}

/// Orchestrates the full request lifecycle.
pub struct AgentController {
    registry: Arc<CapabilityRegistry>,
    sandbox: Arc<SandboxExecutor>,
    synthesis: SynthesisPipeline,
    llm: Option<Arc<dyn LanguageModel>>,
    metrics: Arc<MetricsCollector>,
    result_validator: ResultValidator,
    confidence_threshold: f64,
    state: AgentState,
    context: ContextManager,
    reflexion: ReflexionMemory,
}

impl AgentController {
    pub fn new(
        config: &Config,
        registry: Arc<CapabilityRegistry>,
        sandbox: Arc<SandboxExecutor>,
        llm: Option<Arc<dyn LanguageModel>>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let synthesis = SynthesisPipeline::new(llm.clone(), registry.clone(), sandbox.clone());
        Self {
            registry,
            sandbox,
            synthesis,
            llm,
            metrics,
            result_validator: ResultValidator::new(),
            confidence_threshold: config.confidence_threshold,
            state: AgentState::new(config.max_retries),
            context: ContextManager::new(),
            reflexion: ReflexionMemory::new(),
        }
    }

    /// Handle one request end to end. Retries happen inside this call;
    /// the returned response is always terminal for the attempt budget.
    pub async fn handle_request(&mut self, request: &Request) -> Response {
        let started = Instant::now();

        // A task that already exhausted its budget stays degraded
        if self.state.request.as_deref() == Some(request.task.as_str()) && !self.state.can_retry()
        {
            return Response::Degraded {
                message: format!(
                    "task failed after {} attempts and is not retried automatically",
                    self.state.retry_count + 1
                ),
                feedback: self.state.feedback.clone(),
                partial_result: None,
            };
        }

        self.state.begin_request(&request.task);

        loop {
            match self.attempt(request).await {
                Ok(AttemptOutcome::Success { result, tool_id }) => {
                    self.state.transition(StateKind::Respond, json!({"tool": &tool_id}));
                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.metrics.record_request("success", duration_ms as f64);
                    self.context.update_short_term(json!({
                        "task": &request.task,
                        "outcome": "success",
                        "tool": &tool_id,
                    }));

                    return Response::Success {
                        result,
                        tool_used: tool_id,
                        metadata: ResponseMetadata {
                            retries: self.state.retry_count,
                            state_history: self
                                .state
                                .state_names()
                                .into_iter()
                                .map(str::to_string)
                                .collect(),
                            duration_ms,
                        },
                    };
                }
                Ok(AttemptOutcome::Failed {
                    kind,
                    details,
                    partial,
                }) => {
                    self.state.add_feedback(kind, details);
                    self.state.transition(StateKind::Learn, json!({"failure": kind.as_str()}));

                    if self.reflexion.should_reflect(&self.state.feedback) {
                        self.reflexion
                            .add_episode(&request.task, "failed_attempt", &self.state.feedback);
                        self.context.add_episodic(json!({
                            "task": &request.task,
                            "outcome": "failed_attempt",
                            "failure": kind.as_str(),
                        }));
                    }

                    if self.state.can_retry() {
                        self.state.increment_retry();
                        info!(
                            task = %request.task,
                            retry = self.state.retry_count,
                            failure = kind.as_str(),
                            "retrying"
                        );
                        continue;
                    }

                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.metrics.record_request("degraded", duration_ms as f64);
                    self.context.add_episodic(json!({
                        "task": &request.task,
                        "outcome": "degraded",
                    }));
                    warn!(task = %request.task, "retry budget exhausted, degrading");

                    return Response::Degraded {
                        message: format!(
                            "task failed after {} attempts",
                            self.state.retry_count + 1
                        ),
                        feedback: self.state.feedback.clone(),
                        partial_result: partial,
                    };
                }
                Err(e) => {
                    self.state
                        .transition(StateKind::Error, json!({"error": e.to_string()}));
                    self.metrics
                        .record_request("error", started.elapsed().as_millis() as f64);
                    warn!(task = %request.task, error = %e, "request failed with internal error");

                    return Response::Error {
                        error: "internal_error".to_string(),
                        message: e.to_string(),
                    };
                }
            }
        }
    }

    /// One pass through the pipeline.
    async fn attempt(&mut self, request: &Request) -> Result<AttemptOutcome> {
        // Plan
        self.state.transition(StateKind::Plan, json!({}));
        let mut context = self.context.build(&request.task);
        context
            .relevant_history
            .extend(self.reflexion.get_relevant(REFLEXION_CONTEXT_LEN));

        let mut plan = Planner::reactive(self.llm.clone()).plan(&context).await;
        if plan.confidence < self.confidence_threshold.min(ESCALATION_THRESHOLD) {
            plan = Planner::exploratory().plan(&context).await;
        }

        // Select when a candidate exists, otherwise design
        let capability = match self.select_capability(&plan) {
            Some(capability) => {
                self.state.transition(
                    StateKind::SelectCapability,
                    json!({"intent": &plan.intent, "tool": &capability.id}),
                );
                capability
            }
            None => match self.design_capability(&plan, request).await? {
                Designed::Ready(capability) => capability,
                Designed::Failed { kind, details } => {
                    return Ok(AttemptOutcome::Failed {
                        kind,
                        details,
                        partial: None,
                    });
                }
            },
        };

        // Execute
        self.state
            .transition(StateKind::Execute, json!({"tool": &capability.id}));
        let policy = SandboxPolicy::for_constraints(&capability.artifact.spec.constraints);
        let exec = self
            .sandbox
            .execute(&capability.artifact, &request.args, Some(&policy))
            .await;
        self.metrics
            .record_execution(&capability.id, exec.succeeded(), exec.duration_ms as f64);

        // Verify
        self.state.transition(StateKind::Verify, json!({}));
        let report = self.result_validator.validate(&exec, &plan.success_criteria);
        self.registry.update_stats(&capability.id, report.passed)?;

        if report.passed {
            let mut result = exec.result.unwrap_or(Value::Null);
            sanitize_output(&mut result);
            return Ok(AttemptOutcome::Success {
                result,
                tool_id: capability.id,
            });
        }

        let kind = match exec.status {
            ExecutionStatus::Timeout => FailureKind::Timeout,
            ExecutionStatus::Error => FailureKind::ExecutionError,
            ExecutionStatus::Success => FailureKind::BadResult,
        };
        let details = json!({
            "tool": &capability.id,
            "failures": report.failures,
            "error": exec.error,
        });
        // Every failed verification is a bad result; the precise
        // status rides along as its own feedback entry.
        if kind != FailureKind::BadResult {
            self.state.add_feedback(kind, details.clone());
        }
        Ok(AttemptOutcome::Failed {
            kind: FailureKind::BadResult,
            details,
            partial: exec.result,
        })
    }

    /// Best existing match for the plan, if any.
    fn select_capability(&self, plan: &Plan) -> Option<Capability> {
        let hits = self
            .registry
            .search(&plan.intent, Some(&plan.io_spec), DEFAULT_SEARCH_LIMIT);
        hits.first().and_then(|hit| self.registry.get(&hit.id))
    }

    /// Synthesize a new capability for the plan. A failed pipeline is
    /// a recoverable, retryable outcome, not an internal error.
    async fn design_capability(&mut self, plan: &Plan, request: &Request) -> Result<Designed> {
        self.state
            .transition(StateKind::DesignCapability, json!({"intent": &plan.intent}));
        let spec = spec_from_plan(plan, request);

        self.state.transition(StateKind::Validate, json!({}));
        let synth_started = Instant::now();
        let outcome = self.synthesis.create(&spec).await?;
        self.metrics
            .record_synthesis(outcome.is_ready(), synth_started.elapsed().as_millis() as f64);

        if !outcome.is_ready() {
            return Ok(Designed::Failed {
                kind: outcome.reason.unwrap_or(FailureKind::ToolCreationFailed),
                details: json!({
                    "spec": spec.name,
                    "findings": outcome.findings,
                }),
            });
        }

        let tool_id = outcome
            .tool_id
            .ok_or_else(|| anyhow!("synthesis reported ready without a tool id"))?;
        let capability = self
            .registry
            .get(&tool_id)
            .context("registered capability missing from index")?;
        Ok(Designed::Ready(capability))
    }

    /// Free-form chat passthrough for requests that are conversation,
    /// not tasks. The short-term buffer doubles as chat history.
    pub async fn chat(&self, message: &str) -> Result<String> {
        match &self.llm {
            Some(model) => {
                let history = self.context.build(message).short_term;
                model.chat(message, &history).await
            }
            None => Err(anyhow!("no language model configured")),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn reflexion(&self) -> &ReflexionMemory {
        &self.reflexion
    }
}

/// Derive a capability spec from a plan.
fn spec_from_plan(plan: &Plan, request: &Request) -> CapabilitySpec {
    let slug: String = plan
        .intent
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let name = format!("tool_{}", if slug.is_empty() { "task" } else { &slug });

    let mut spec = CapabilitySpec::new(&name, &request.task);
    spec.io_spec = plan.io_spec.clone();
    spec.tests = vec![SmokeTest::basic()];
    spec.tags = plan.intent.split_whitespace().map(str::to_string).collect();
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Artifact;
    use tempfile::TempDir;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn controller() -> (TempDir, AgentController) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            registry_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        let registry = Arc::new(CapabilityRegistry::open(dir.path()).unwrap());
        let sandbox = Arc::new(SandboxExecutor::new(SandboxPolicy::strict()));
        let metrics = Arc::new(MetricsCollector::new());
        let ctl = AgentController::new(&config, registry, sandbox, None, metrics);
        (dir, ctl)
    }

    fn register_failing_tool(ctl: &AgentController) {
        let spec = {
            let mut s = CapabilitySpec::new("always_fails", "always fails on purpose");
            s.tags = vec!["always".to_string(), "fails".to_string()];
            s
        };
        let artifact = Artifact::python_function(
            "def always_fails(input_data):\n    raise RuntimeError(\"no luck\")\n".to_string(),
            spec.clone(),
            "always_fails".to_string(),
        );
        ctl.registry().register(artifact, &spec, "0.1.0").unwrap();
    }

    #[tokio::test]
    async fn test_empty_registry_designs_then_succeeds() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }

        let (_dir, mut ctl) = controller();
        let request = Request::new("echo the payload", json!({"value": 7}));
        let response = ctl.handle_request(&request).await;

        match response {
            Response::Success {
                result,
                tool_used,
                metadata,
            } => {
                assert_eq!(result["data"]["value"], 7);
                assert!(tool_used.starts_with("tool_"));
                assert_eq!(metadata.retries, 0);
                assert!(metadata
                    .state_history
                    .contains(&"design_capability".to_string()));
                // Nothing to select against an empty registry
                assert!(!metadata
                    .state_history
                    .contains(&"select_capability".to_string()));
            }
            other => panic!("expected success, got {:?}", other),
        }

        // The synthesized capability is now discoverable
        assert!(!ctl.registry().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_failure_degrades_with_feedback() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }

        let (_dir, mut ctl) = controller();
        register_failing_tool(&ctl);

        let request = Request::new("always fails", json!({}));
        let response = ctl.handle_request(&request).await;

        match response {
            Response::Degraded { feedback, .. } => {
                assert!(feedback.len() >= 3, "feedback: {}", feedback.len());
                // Each attempt records the fine-grained status and the
                // failed verification itself
                assert!(feedback
                    .iter()
                    .any(|f| f.category == FailureKind::ExecutionError));
                assert!(feedback
                    .iter()
                    .any(|f| f.category == FailureKind::BadResult));
            }
            other => panic!("expected degraded, got {:?}", other),
        }

        // Failed verifications trigger reflection, leaving episodes
        assert!(!ctl.reflexion().is_empty());

        // Failures fold into the capability's rolling stats
        let meta = ctl.registry().get("always_fails_0.1.0").unwrap().metadata;
        assert!(meta.success_rate < 1.0);
        assert!(meta.usage_count >= 3);
    }

    #[tokio::test]
    async fn test_exhausted_task_short_circuits() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }

        let (_dir, mut ctl) = controller();
        register_failing_tool(&ctl);

        let request = Request::new("always fails", json!({}));
        let first = ctl.handle_request(&request).await;
        assert!(matches!(first, Response::Degraded { .. }));

        let usage_before = ctl.registry().get("always_fails_0.1.0").unwrap().metadata.usage_count;

        let second = ctl.handle_request(&request).await;
        match second {
            Response::Degraded { message, .. } => {
                assert!(message.contains("not retried automatically"));
            }
            other => panic!("expected degraded, got {:?}", other),
        }

        // No pipeline steps ran the second time
        let usage_after = ctl.registry().get("always_fails_0.1.0").unwrap().metadata.usage_count;
        assert_eq!(usage_before, usage_after);
    }

    #[tokio::test]
    async fn test_chat_requires_model() {
        let (_dir, ctl) = controller();
        assert!(ctl.chat("hello").await.is_err());
    }

    #[test]
    fn test_spec_from_plan_sanitizes_name() {
        let plan = Plan {
            strategy: "reactive".to_string(),
            intent: "Parse JSON: quickly!".to_string(),
            io_spec: Default::default(),
            actions: vec![],
            success_criteria: Default::default(),
            confidence: 0.8,
            explored_paths: None,
        };
        let spec = spec_from_plan(&plan, &Request::new("parse json quickly", json!({})));
        assert_eq!(spec.name, "tool_parse_json_quickly");
        assert_eq!(spec.tests.len(), 1);
    }
}
