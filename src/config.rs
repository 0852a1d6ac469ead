//! Configuration management
//!
//! All knobs are sourced from the environment here and handed to the
//! core components as plain values; nothing below this layer reads
//! `std::env` directly.

use anyhow::Result;
use std::path::PathBuf;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Reactive-planner confidence below which the exploratory
    /// planner takes over
    pub confidence_threshold: f64,

    /// Maximum bounded retries per request
    pub max_retries: u32,

    /// Sandbox CPU-time limit in seconds
    pub sandbox_cpu_limit_secs: u64,

    /// Sandbox memory limit in MB
    pub sandbox_memory_mb: u64,

    /// Sandbox wall-clock limit in seconds
    pub sandbox_timeout_secs: u64,

    /// Allow network access inside synthesized capabilities
    pub sandbox_network_enabled: bool,

    /// Capability registry storage directory
    pub registry_path: PathBuf,

    /// Remote LLM API key (optional - template fallback without it)
    pub llm_api_key: Option<String>,

    /// Remote LLM model name
    pub llm_model: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let confidence_threshold = std::env::var("MINDFORGE_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.7);

        let max_retries = std::env::var("MINDFORGE_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let sandbox_cpu_limit_secs = std::env::var("MINDFORGE_SANDBOX_CPU_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let sandbox_memory_mb = std::env::var("MINDFORGE_SANDBOX_MEMORY_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(512);

        let sandbox_timeout_secs = std::env::var("MINDFORGE_SANDBOX_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let sandbox_network_enabled = std::env::var("MINDFORGE_SANDBOX_NETWORK")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let registry_path = std::env::var("MINDFORGE_REGISTRY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".mindforge").join("registry"))
                    .unwrap_or_else(|_| PathBuf::from(".mindforge/registry"))
            });

        let llm_api_key = std::env::var("MINDFORGE_LLM_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok();

        let llm_model = std::env::var("MINDFORGE_LLM_MODEL")
            .unwrap_or_else(|_| "gemini-2.0-flash-exp".to_string());

        let log_level = std::env::var("MINDFORGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            confidence_threshold,
            max_retries,
            sandbox_cpu_limit_secs,
            sandbox_memory_mb,
            sandbox_timeout_secs,
            sandbox_network_enabled,
            registry_path,
            llm_api_key,
            llm_model,
            log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_retries: 3,
            sandbox_cpu_limit_secs: 30,
            sandbox_memory_mb: 512,
            sandbox_timeout_secs: 60,
            sandbox_network_enabled: false,
            registry_path: PathBuf::from(".mindforge/registry"),
            llm_api_key: None,
            llm_model: "gemini-2.0-flash-exp".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_retries, 3);
        assert!((config.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert!(!config.sandbox_network_enabled);
    }
}
