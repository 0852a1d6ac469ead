//! Result verification and output sanitization.
//!
//! After a capability executes, its result is checked against the
//! plan's success criteria before anything is shown to the caller.
//! Verification is structural only; it never re-runs the capability.

use crate::sandbox::{ExecutionResult, ExecutionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a plan requires of an execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessCriteria {
    /// A result payload must be present
    #[serde(default = "default_true")]
    pub has_result: bool,
    /// Neither the execution nor the payload may carry an error
    #[serde(default = "default_true")]
    pub no_errors: bool,
    /// The payload must be a JSON object with the required fields
    #[serde(default)]
    pub valid_schema: bool,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            has_result: true,
            no_errors: true,
            valid_schema: false,
            required_fields: Vec::new(),
        }
    }
}

/// Outcome of checking a result against its criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub failures: Vec<String>,
}

/// Structural result checker.
#[derive(Default)]
pub struct ResultValidator;

impl ResultValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        result: &ExecutionResult,
        criteria: &SuccessCriteria,
    ) -> VerificationReport {
        let mut failures = Vec::new();

        if criteria.has_result && (result.status != ExecutionStatus::Success || result.result.is_none())
        {
            failures.push("no result produced".to_string());
        }

        if criteria.no_errors {
            if result.status != ExecutionStatus::Success {
                failures.push(format!(
                    "execution ended with status {:?}",
                    result.status
                ));
            }
            if let Some(error) = &result.error {
                failures.push(format!("execution reported error: {}", error));
            }
            if let Some(payload) = &result.result {
                if payload.get("error").is_some()
                    || payload.get("status").and_then(Value::as_str) == Some("error")
                {
                    failures.push("result payload carries an error".to_string());
                }
            }
        }

        if criteria.valid_schema {
            match result.result.as_ref().and_then(Value::as_object) {
                Some(obj) => {
                    for field in &criteria.required_fields {
                        if !obj.contains_key(field) {
                            failures.push(format!("missing required field: {}", field));
                        }
                    }
                }
                None => failures.push("result is not a JSON object".to_string()),
            }
        }

        VerificationReport {
            passed: failures.is_empty(),
            failures,
        }
    }
}

const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token", "api_key", "apikey", "credential"];

/// Redact secret-bearing fields in place before a payload leaves the
/// system. Matching is by key name, case-insensitive, at any depth.
pub fn sanitize_output(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                    *val = Value::String("[redacted]".to_string());
                } else {
                    sanitize_output(val);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_output(item);
            }
        }
        _ => {}
    }
}
