//! Controller state machine and context assembly.
//!
//! The state machine is data, not control flow: the controller drives
//! transitions explicitly and every hop is recorded with a timestamp,
//! so a finished request carries its full trajectory. Feedback entries
//! accumulate across retries of one request and are cleared when the
//! next request starts.

use crate::error::FailureKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default retry ceiling per request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How many episodic entries a context carries.
const RELEVANT_HISTORY_LEN: usize = 5;
/// Short-term buffer cap.
const SHORT_TERM_CAP: usize = 20;

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Idle,
    Plan,
    SelectCapability,
    DesignCapability,
    Validate,
    Execute,
    Verify,
    Respond,
    Learn,
    Error,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Plan => "plan",
            Self::SelectCapability => "select_capability",
            Self::DesignCapability => "design_capability",
            Self::Validate => "validate",
            Self::Execute => "execute",
            Self::Verify => "verify",
            Self::Respond => "respond",
            Self::Learn => "learn",
            Self::Error => "error",
        }
    }
}

/// One recorded state hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: StateKind,
    pub to: StateKind,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Structured failure feedback from one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub category: FailureKind,
    pub details: Value,
    pub timestamp: String,
}

/// Mutable per-request machine state.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub current_state: StateKind,
    pub request: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub history: Vec<StateTransition>,
    pub feedback: Vec<FeedbackEntry>,
}

impl AgentState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            current_state: StateKind::Idle,
            request: None,
            retry_count: 0,
            max_retries,
            history: Vec::new(),
            feedback: Vec::new(),
        }
    }

    /// Record a transition and move to `to`.
    pub fn transition(&mut self, to: StateKind, metadata: Value) {
        self.history.push(StateTransition {
            from: self.current_state,
            to,
            timestamp: Utc::now().to_rfc3339(),
            metadata,
        });
        self.current_state = to;
    }

    pub fn add_feedback(&mut self, category: FailureKind, details: Value) {
        self.feedback.push(FeedbackEntry {
            category,
            details,
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Start a fresh request: feedback and the retry counter reset,
    /// the transition history is kept.
    pub fn begin_request(&mut self, task: &str) {
        self.request = Some(task.to_string());
        self.retry_count = 0;
        self.feedback.clear();
        self.current_state = StateKind::Idle;
    }

    /// State names traversed so far, oldest first.
    pub fn state_names(&self) -> Vec<&'static str> {
        self.history.iter().map(|t| t.to.as_str()).collect()
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Context handed to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub request: String,
    pub short_term: Vec<Value>,
    pub relevant_history: Vec<Value>,
}

/// Two-tier context memory: a bounded short-term buffer for the
/// current session and an append-only episodic log.
#[derive(Debug, Default)]
pub struct ContextManager {
    short_term: Vec<Value>,
    episodic: Vec<Value>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the planning context for a request: the short-term
    /// buffer plus the most recent episodic entries.
    pub fn build(&self, request: &str) -> Context {
        let relevant_history = self
            .episodic
            .iter()
            .rev()
            .take(RELEVANT_HISTORY_LEN)
            .rev()
            .cloned()
            .collect();

        Context {
            request: request.to_string(),
            short_term: self.short_term.clone(),
            relevant_history,
        }
    }

    pub fn update_short_term(&mut self, entry: Value) {
        self.short_term.push(entry);
        if self.short_term.len() > SHORT_TERM_CAP {
            self.short_term.remove(0);
        }
    }

    pub fn add_episodic(&mut self, entry: Value) {
        self.episodic.push(entry);
    }

    pub fn episodic_len(&self) -> usize {
        self.episodic.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transitions_are_recorded_in_order() {
        let mut state = AgentState::default();
        state.transition(StateKind::Plan, json!({}));
        state.transition(StateKind::SelectCapability, json!({"hits": 2}));

        assert_eq!(state.current_state, StateKind::SelectCapability);
        assert_eq!(state.state_names(), vec!["plan", "select_capability"]);
        assert_eq!(state.history[1].from, StateKind::Plan);
    }

    #[test]
    fn test_retry_ceiling() {
        let mut state = AgentState::new(3);
        assert!(state.can_retry());
        for _ in 0..3 {
            state.increment_retry();
        }
        assert!(!state.can_retry());
    }

    #[test]
    fn test_begin_request_resets_feedback_not_history() {
        let mut state = AgentState::default();
        state.transition(StateKind::Plan, json!({}));
        state.add_feedback(crate::error::FailureKind::Error, json!({"why": "boom"}));
        state.increment_retry();

        state.begin_request("new task");
        assert_eq!(state.retry_count, 0);
        assert!(state.feedback.is_empty());
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.current_state, StateKind::Idle);
    }

    #[test]
    fn test_context_takes_recent_history() {
        let mut cm = ContextManager::new();
        for i in 0..8 {
            cm.add_episodic(json!({"n": i}));
        }
        let ctx = cm.build("do things");
        assert_eq!(ctx.relevant_history.len(), 5);
        assert_eq!(ctx.relevant_history[0]["n"], 3);
        assert_eq!(ctx.relevant_history[4]["n"], 7);
    }

    #[test]
    fn test_short_term_buffer_is_bounded() {
        let mut cm = ContextManager::new();
        for i in 0..30 {
            cm.update_short_term(json!(i));
        }
        let ctx = cm.build("x");
        assert_eq!(ctx.short_term.len(), 20);
        assert_eq!(ctx.short_term[0], json!(10));
    }
}
