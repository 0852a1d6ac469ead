//! Process-isolated execution: policies plus the executor.

pub mod executor;
pub mod policy;

pub use executor::{ExecutionResult, ExecutionStatus, SandboxExecutor};
pub use policy::{ResourcePolicy, SandboxPolicy, SecurityPolicy};
