//! Language model access.
//!
//! Everything upstream of the HTTP call goes through the
//! [`LanguageModel`] trait so planners, synthesis and the controller
//! can be driven by a stub in tests. [`HttpLanguageModel`] is the
//! production implementation: a Gemini-style REST endpoint behind
//! bounded retries with exponential backoff and jitter.

use crate::config::Config;
use crate::registry::CapabilitySpec;
use crate::synthesis::validator::ValidationFinding;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Model-facing seam for planning, codegen and chat.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a plan for a task as a JSON object. The caller owns
    /// interpretation and falls back to heuristics on junk output.
    async fn generate_plan(&self, task: &str, context: &Value) -> Result<Value>;

    /// Generate capability source for a spec.
    async fn generate_code(&self, spec: &CapabilitySpec) -> Result<String>;

    /// One repair attempt: rewrite `code` so the listed findings no
    /// longer apply.
    async fn repair_code(&self, code: &str, findings: &[ValidationFinding]) -> Result<String>;

    /// Free-form chat passthrough. `history` is prior turns, oldest
    /// first, as `{role, text}` objects.
    async fn chat(&self, message: &str, history: &[Value]) -> Result<String>;
}

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_JITTER_MS: u64 = 250;

/// REST-backed language model client.
pub struct HttpLanguageModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl HttpLanguageModel {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            max_retries: 3,
        }
    }

    /// Build from config; `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .llm_api_key
            .as_ref()
            .map(|key| Self::new(key.clone(), config.llm_model.clone()))
    }

    /// One prompt in, one text completion out, with bounded retries.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            BASE_URL, self.model, self.api_key
        );
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}]
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS << (attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }

            match self.try_complete(&url, &body).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(attempt, error = %e, "model call failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("model call failed")))
    }

    async fn try_complete(&self, url: &str, body: &Value) -> Result<String> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("model returned {}: {}", status, detail));
        }

        let payload: Value = response.json().await.context("invalid response body")?;
        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow!("response missing completion text"))?;

        debug!(chars = text.len(), "model completion received");
        Ok(text.to_string())
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate_plan(&self, task: &str, context: &Value) -> Result<Value> {
        let prompt = format!(
            "Plan how to satisfy this task. Respond with a single JSON object \
             with keys: intent (string), input_type (string), output_type (string), \
             actions (array of strings), confidence (number 0..1).\n\n\
             Task: {}\n\nContext: {}",
            task, context
        );
        let text = self.complete(&prompt).await?;
        extract_json(&text).ok_or_else(|| anyhow!("plan response contained no JSON object"))
    }

    async fn generate_code(&self, spec: &CapabilitySpec) -> Result<String> {
        let prompt = format!(
            "Write a single Python function named `{name}` taking one argument \
             `input_data` and returning a dict with a \"status\" key. Only use the \
             standard library modules json, re, math, datetime, typing, dataclasses, \
             collections, itertools, functools, string, statistics, decimal, fractions. \
             Never import os, subprocess or networking modules, never call eval or exec. \
             Respond with the code only.\n\n\
             Description: {description}\n\
             Input type: {input_type}\n\
             Output type: {output_type}",
            name = spec.name,
            description = spec.description,
            input_type = spec.io_spec.input_type,
            output_type = spec.io_spec.output_type,
        );
        let text = self.complete(&prompt).await?;
        Ok(strip_code_fences(&text))
    }

    async fn repair_code(&self, code: &str, findings: &[ValidationFinding]) -> Result<String> {
        let issues = findings
            .iter()
            .map(|f| format!("- [{}] {}", f.severity.as_str(), f.message))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "This Python code failed validation. Rewrite it so every issue below is \
             resolved, keeping the same function name and signature. Respond with the \
             code only.\n\nIssues:\n{}\n\nCode:\n{}",
            issues, code
        );
        let text = self.complete(&prompt).await?;
        Ok(strip_code_fences(&text))
    }

    async fn chat(&self, message: &str, history: &[Value]) -> Result<String> {
        if history.is_empty() {
            return self.complete(message).await;
        }

        let mut prompt = String::from("Conversation so far:\n");
        for turn in history {
            let role = turn.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = turn.get("text").and_then(Value::as_str).unwrap_or_default();
            prompt.push_str(&format!("{}: {}\n", role, text));
        }
        prompt.push_str(&format!("user: {}\n", message));
        self.complete(&prompt).await
    }
}

/// Pull the first balanced JSON object out of free-form model text.
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + c.len_utf8()];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip a surrounding markdown code fence, if present.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // Drop the language tag on the opening fence
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Sure, here is the plan:\n{\"intent\": \"parse\", \"confidence\": 0.8}\nHope that helps.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["intent"], "parse");
    }

    #[test]
    fn test_extract_json_handles_nesting_and_strings() {
        let text = r#"{"a": {"b": "} not a close"}, "c": 1}"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["c"], 1);
        assert_eq!(value["a"]["b"], "} not a close");
    }

    #[test]
    fn test_extract_json_none_without_object() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{truncated").is_none());
    }

    #[test]
    fn test_strip_code_fences() {
        let fenced = "```python\ndef f(x):\n    return x\n```";
        assert_eq!(strip_code_fences(fenced), "def f(x):\n    return x");
        assert_eq!(strip_code_fences("plain text"), "plain text");
    }
}
