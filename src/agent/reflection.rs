//! Reflexion memory: learning from failed attempts.
//!
//! Episodes are append-only. Reflection fires only on outcome-level
//! failures (bad results, runtime errors); validation and test
//! failures are handled inside the synthesis loop and never reach
//! here.

use crate::agent::state::FeedbackEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One recorded failure episode with its extracted lessons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexionEpisode {
    pub task: String,
    pub outcome: String,
    pub feedback: Vec<FeedbackEntry>,
    pub lessons: Vec<String>,
    pub timestamp: String,
}

/// Append-only episode log.
#[derive(Debug, Default)]
pub struct ReflexionMemory {
    episodes: Vec<ReflexionEpisode>,
}

impl ReflexionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflection triggers only when some feedback is outcome-level.
    pub fn should_reflect(&self, feedback: &[FeedbackEntry]) -> bool {
        feedback.iter().any(|f| f.category.triggers_reflection())
    }

    /// Record an episode, deriving one lesson per distinct failure
    /// category.
    pub fn add_episode(&mut self, task: &str, outcome: &str, feedback: &[FeedbackEntry]) {
        let mut lessons = Vec::new();
        for entry in feedback {
            let lesson = format!("Avoid {} in similar tasks", entry.category.as_str());
            if !lessons.contains(&lesson) {
                lessons.push(lesson);
            }
        }

        debug!(task, outcome, lessons = lessons.len(), "recorded reflexion episode");
        self.episodes.push(ReflexionEpisode {
            task: task.to_string(),
            outcome: outcome.to_string(),
            feedback: feedback.to_vec(),
            lessons,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }

    /// Most recent episodes as planner-consumable context entries.
    pub fn get_relevant(&self, limit: usize) -> Vec<Value> {
        self.episodes
            .iter()
            .rev()
            .take(limit)
            .rev()
            .map(|e| {
                serde_json::json!({
                    "task": &e.task,
                    "outcome": &e.outcome,
                    "lessons": &e.lessons,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use serde_json::json;

    fn entry(category: FailureKind) -> FeedbackEntry {
        FeedbackEntry {
            category,
            details: json!({}),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_reflection_only_on_outcome_failures() {
        let memory = ReflexionMemory::new();
        assert!(memory.should_reflect(&[entry(FailureKind::BadResult)]));
        assert!(memory.should_reflect(&[entry(FailureKind::Error)]));
        assert!(!memory.should_reflect(&[entry(FailureKind::ValidationFailed)]));
        assert!(!memory.should_reflect(&[]));
    }

    #[test]
    fn test_lessons_deduplicated_by_category() {
        let mut memory = ReflexionMemory::new();
        memory.add_episode(
            "sum numbers",
            "degraded",
            &[entry(FailureKind::BadResult), entry(FailureKind::BadResult)],
        );

        let relevant = memory.get_relevant(5);
        assert_eq!(relevant.len(), 1);
        let lessons = relevant[0]["lessons"].as_array().unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0], "Avoid bad_result in similar tasks");
    }

    #[test]
    fn test_get_relevant_is_recency_bounded() {
        let mut memory = ReflexionMemory::new();
        for i in 0..6 {
            memory.add_episode(&format!("task {}", i), "degraded", &[entry(FailureKind::Error)]);
        }

        let relevant = memory.get_relevant(3);
        assert_eq!(relevant.len(), 3);
        assert_eq!(relevant[0]["task"], "task 3");
        assert_eq!(relevant[2]["task"], "task 5");
        assert_eq!(memory.len(), 6);
    }
}
