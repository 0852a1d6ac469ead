//! Command-line interface.
//!
//! `submit` is the main entry: one task in, one JSON response out.
//! The registry commands (`list-tools`, `inspect`, `dry-run`) operate
//! on the capability store directly, without the agent loop.

use crate::agent::{AgentController, Request, Response};
use crate::config::Config;
use crate::llm::{HttpLanguageModel, LanguageModel};
use crate::metrics::MetricsCollector;
use crate::registry::CapabilityRegistry;
use crate::sandbox::{ResourcePolicy, SandboxExecutor, SandboxPolicy, SecurityPolicy};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mindforge", version, about = "Self-extending task agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit a task for the agent to satisfy
    Submit {
        /// Task description
        task: String,
        /// Task arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List registered capabilities
    ListTools {
        #[arg(long)]
        include_deprecated: bool,
    },
    /// Show one capability's metadata
    Inspect {
        id: String,
        /// Also print the capability source
        #[arg(long)]
        show_code: bool,
    },
    /// Execute a registered capability directly, skipping the agent loop
    DryRun {
        id: String,
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Dump the metrics snapshot
    Metrics,
    /// Send a free-form message to the configured language model
    Chat { message: String },
}

/// Dispatch a parsed invocation. Returns the process exit code.
pub async fn run(cli: Cli, config: Config) -> Result<i32> {
    let registry = Arc::new(CapabilityRegistry::open(&config.registry_path)?);
    let sandbox = Arc::new(SandboxExecutor::new(default_policy(&config)));
    let metrics = Arc::new(MetricsCollector::new());
    let llm: Option<Arc<dyn LanguageModel>> =
        HttpLanguageModel::from_config(&config).map(|m| Arc::new(m) as Arc<dyn LanguageModel>);

    match cli.command {
        Command::Submit { task, args } => {
            let args = parse_args(&args)?;
            let mut controller =
                AgentController::new(&config, registry, sandbox, llm, metrics.clone());

            let response = controller.handle_request(&Request::new(&task, args)).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(match response {
                Response::Success { .. } => 0,
                Response::Degraded { .. } | Response::Error { .. } => 1,
            })
        }
        Command::ListTools { include_deprecated } => {
            let tools = registry.list_all(include_deprecated);
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(0)
        }
        Command::Inspect { id, show_code } => {
            let Some(capability) = registry.get(&id) else {
                eprintln!("capability not found: {}", id);
                return Ok(1);
            };
            println!("{}", serde_json::to_string_pretty(&capability.metadata)?);
            if show_code {
                println!("{}", capability.code());
            }
            Ok(0)
        }
        Command::DryRun { id, args } => {
            let args = parse_args(&args)?;
            let capability = registry
                .get(&id)
                .ok_or_else(|| anyhow!("capability not found: {}", id))?;

            let policy = SandboxPolicy::for_constraints(&capability.artifact.spec.constraints);
            let result = sandbox
                .execute(&capability.artifact, &args, Some(&policy))
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.succeeded() { 0 } else { 1 })
        }
        Command::Metrics => {
            println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
            Ok(0)
        }
        Command::Chat { message } => {
            let controller = AgentController::new(&config, registry, sandbox, llm, metrics);
            let reply = controller.chat(&message).await?;
            println!("{}", reply);
            Ok(0)
        }
    }
}

fn parse_args(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args must be valid JSON")?;
    if !value.is_object() {
        return Err(anyhow!("--args must be a JSON object"));
    }
    Ok(value)
}

fn default_policy(config: &Config) -> SandboxPolicy {
    SandboxPolicy {
        resources: ResourcePolicy {
            cpu_time_limit_secs: config.sandbox_cpu_limit_secs,
            wall_time_limit_secs: config.sandbox_timeout_secs,
            memory_limit_mb: config.sandbox_memory_mb,
            ..ResourcePolicy::default()
        },
        security: SecurityPolicy {
            network_enabled: config.sandbox_network_enabled,
            ..SecurityPolicy::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args_requires_object() {
        assert!(parse_args("{}").is_ok());
        assert!(parse_args("{\"n\": 1}").is_ok());
        assert!(parse_args("[1, 2]").is_err());
        assert!(parse_args("not json").is_err());
    }

    #[test]
    fn test_default_policy_tracks_config() {
        let config = Config {
            sandbox_cpu_limit_secs: 5,
            sandbox_timeout_secs: 12,
            sandbox_memory_mb: 64,
            sandbox_network_enabled: true,
            ..Config::default()
        };
        let policy = default_policy(&config);
        assert_eq!(policy.resources.cpu_time_limit_secs, 5);
        assert_eq!(policy.resources.wall_time_limit_secs, 12);
        assert_eq!(policy.resources.memory_limit_mb, 64);
        assert!(policy.security.network_enabled);
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from(["mindforge", "submit", "sum numbers", "--args", "{\"n\":1}"])
            .unwrap();
        match cli.command {
            Command::Submit { task, args } => {
                assert_eq!(task, "sum numbers");
                assert_eq!(args, "{\"n\":1}");
            }
            _ => panic!("expected submit"),
        }
    }
}
