//! Failure taxonomy and typed errors.
//!
//! Recoverable failures travel as data (`FailureKind` inside feedback
//! entries and synthesis outcomes), never as panics. Only genuinely
//! unexpected conditions (storage I/O) surface as `RegistryError` and
//! reach the controller's outer boundary.

use serde::{Deserialize, Serialize};

/// Categories of recoverable failure flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Code generation produced nothing usable.
    GenerationFailed,
    /// Static validation found blockers, repair included.
    ValidationFailed,
    /// Declared smoke tests failed.
    TestsFailed,
    /// Synthesis as a whole failed; the attempt has no capability.
    ToolCreationFailed,
    /// The sandboxed process reported or caused an error.
    ExecutionError,
    /// The sandboxed process exceeded its wall-clock budget.
    Timeout,
    /// Execution produced a result that failed verification.
    BadResult,
    /// Unexpected failure recorded as feedback.
    Error,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerationFailed => "generation_failed",
            Self::ValidationFailed => "validation_failed",
            Self::TestsFailed => "tests_failed",
            Self::ToolCreationFailed => "tool_creation_failed",
            Self::ExecutionError => "execution_error",
            Self::Timeout => "timeout",
            Self::BadResult => "bad_result",
            Self::Error => "error",
        }
    }

    /// Whether this failure should trigger a reflexion pass.
    pub fn triggers_reflection(&self) -> bool {
        matches!(self, Self::BadResult | Self::Error)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the capability registry's storage layer.
///
/// These are the only failures allowed to escape the pipeline; the
/// controller converts them into an `error` response without retry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode capability record: {0}")]
    Serialization(#[from] serde_json::Error),
}
