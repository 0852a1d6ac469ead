//! Planning strategies.
//!
//! Planners are a closed set: reactive (single candidate, the
//! default) and exploratory (bounded breadth, engaged when reactive
//! confidence drops below the escalation threshold). Both produce the
//! same [`Plan`] shape, so the controller never cares which strategy
//! ran.

use crate::llm::LanguageModel;
use crate::registry::IoSpec;
use crate::verify::SuccessCriteria;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Confidence below which the controller escalates from reactive to
/// exploratory planning.
pub const ESCALATION_THRESHOLD: f64 = 0.7;

/// Default exploratory breadth.
pub const DEFAULT_BREADTH: usize = 3;

/// What the controller executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub strategy: String,
    /// Normalized task intent, also the capability search query
    pub intent: String,
    pub io_spec: IoSpec,
    pub actions: Vec<String>,
    pub success_criteria: SuccessCriteria,
    /// Planner self-assessment, 0..1
    pub confidence: f64,
    /// Candidate count considered, exploratory only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explored_paths: Option<usize>,
}

/// Closed planning strategy set.
pub enum Planner {
    Reactive {
        llm: Option<Arc<dyn LanguageModel>>,
    },
    Exploratory {
        breadth: usize,
    },
}

impl Planner {
    pub fn reactive(llm: Option<Arc<dyn LanguageModel>>) -> Self {
        Self::Reactive { llm }
    }

    pub fn exploratory() -> Self {
        Self::Exploratory {
            breadth: DEFAULT_BREADTH,
        }
    }

    /// Produce a plan for the given context.
    pub async fn plan(&self, context: &super::state::Context) -> Plan {
        match self {
            Self::Reactive { llm } => reactive_plan(llm.as_deref(), context).await,
            Self::Exploratory { breadth } => exploratory_plan(*breadth, context),
        }
    }
}

async fn reactive_plan(llm: Option<&dyn LanguageModel>, context: &super::state::Context) -> Plan {
    if let Some(model) = llm {
        let ctx = serde_json::json!({
            "relevant_history": &context.relevant_history,
        });
        match model.generate_plan(&context.request, &ctx).await {
            Ok(value) => {
                if let Some(plan) = plan_from_model_output(&value, context) {
                    debug!(intent = %plan.intent, confidence = plan.confidence, "model plan");
                    return plan;
                }
                warn!("model plan unusable, falling back to heuristic");
            }
            Err(e) => warn!(error = %e, "model planning failed, falling back to heuristic"),
        }
    }
    heuristic_plan(context)
}

/// Interpret a model's JSON plan, keeping the heuristic's defaults
/// for anything missing.
fn plan_from_model_output(value: &Value, context: &super::state::Context) -> Option<Plan> {
    let intent = value.get("intent")?.as_str()?.to_string();
    if intent.is_empty() {
        return None;
    }

    let mut plan = heuristic_plan(context);
    plan.intent = intent;
    if let Some(input_type) = value.get("input_type").and_then(Value::as_str) {
        plan.io_spec.input_type = input_type.to_string();
    }
    if let Some(output_type) = value.get("output_type").and_then(Value::as_str) {
        plan.io_spec.output_type = output_type.to_string();
    }
    if let Some(actions) = value.get("actions").and_then(Value::as_array) {
        plan.actions = actions
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    if let Some(confidence) = value.get("confidence").and_then(Value::as_f64) {
        plan.confidence = confidence.clamp(0.0, 1.0);
    }
    Some(plan)
}

/// Deterministic single-candidate plan. Confidence reflects whether
/// any relevant history backs the guess.
fn heuristic_plan(context: &super::state::Context) -> Plan {
    let confidence = if context.relevant_history.is_empty() {
        0.6
    } else {
        0.8
    };

    Plan {
        strategy: "reactive".to_string(),
        intent: normalize_intent(&context.request),
        io_spec: IoSpec::default(),
        actions: vec!["execute".to_string()],
        success_criteria: SuccessCriteria::default(),
        confidence,
        explored_paths: None,
    }
}

/// Generate `breadth` candidate framings and keep the best. The
/// candidates vary only in confidence weighting; breadth is the cap
/// on exploration, never a target.
fn exploratory_plan(breadth: usize, context: &super::state::Context) -> Plan {
    let breadth = breadth.max(1);
    let base = heuristic_plan(context);

    let best = (0..breadth)
        .map(|i| {
            let mut candidate = base.clone();
            candidate.confidence = (0.5 + 0.1 * i as f64).min(1.0);
            candidate
        })
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    // breadth >= 1 guarantees a candidate
    let mut plan = best.unwrap_or(base);
    plan.strategy = "exploratory".to_string();
    plan.explored_paths = Some(breadth);
    debug!(breadth, confidence = plan.confidence, "exploratory plan");
    plan
}

/// Collapse a free-form request into a short search intent.
fn normalize_intent(request: &str) -> String {
    const STOPWORDS: &[&str] = &[
        "a", "an", "the", "please", "can", "you", "i", "want", "to", "need", "me", "my", "for",
    ];

    let words: Vec<&str> = request
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter(|w| !w.is_empty())
        .filter(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .take(6)
        .collect();

    if words.is_empty() {
        request.trim().to_lowercase()
    } else {
        words.join(" ").to_lowercase()
    }
}
