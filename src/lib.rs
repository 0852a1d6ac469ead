//! MindForge - a self-extending task agent.
//!
//! Satisfies tasks by reusing or synthesizing capabilities:
//! - Capability registry with versioning, search and rolling stats
//! - Synthesis pipeline: generate, validate, smoke-test, register
//! - OS-process sandbox with CPU, memory and wall-clock limits
//! - Controller state machine with bounded retries and reflexion
//!
//! The controller is the single entry point: one request in, one
//! success, degraded or error response out.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod registry;
pub mod sandbox;
pub mod synthesis;
pub mod verify;

pub use agent::{AgentController, Request, Response};
pub use config::Config;
pub use error::{FailureKind, RegistryError};
pub use metrics::MetricsCollector;
pub use registry::CapabilityRegistry;
pub use sandbox::{SandboxExecutor, SandboxPolicy};
pub use synthesis::SynthesisPipeline;
