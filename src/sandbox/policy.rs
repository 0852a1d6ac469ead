//! Sandbox resource and security policies.

use serde::{Deserialize, Serialize};

/// Resource ceilings applied to a sandboxed child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    /// CPU time limit enforced via rlimit, in seconds
    pub cpu_time_limit_secs: u64,
    /// Wall-clock timeout after which the child is killed
    pub wall_time_limit_secs: u64,
    /// Address-space cap in MB
    pub memory_limit_mb: u64,
    /// Cap on captured stdout/stderr, in bytes
    pub max_output_bytes: usize,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            cpu_time_limit_secs: 30,
            wall_time_limit_secs: 60,
            memory_limit_mb: 512,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// What a sandboxed process is allowed to touch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub network_enabled: bool,
    /// Paths writable beyond the execution directory
    pub allowed_write_paths: Vec<String>,
    pub allow_subprocess: bool,
}

/// Combined execution policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub resources: ResourcePolicy,
    pub security: SecurityPolicy,
}

impl SandboxPolicy {
    /// Default locked-down policy: no network, no subprocesses,
    /// writes confined to the execution directory.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Relaxed policy for trusted workloads: network on, doubled
    /// resource ceilings.
    pub fn relaxed() -> Self {
        Self {
            resources: ResourcePolicy {
                cpu_time_limit_secs: 60,
                wall_time_limit_secs: 120,
                memory_limit_mb: 1024,
                max_output_bytes: 4 * 1024 * 1024,
            },
            security: SecurityPolicy {
                network_enabled: true,
                allowed_write_paths: Vec::new(),
                allow_subprocess: false,
            },
        }
    }

    /// Policy derived from a capability's declared constraints.
    pub fn for_constraints(constraints: &crate::registry::Constraints) -> Self {
        Self {
            resources: ResourcePolicy {
                cpu_time_limit_secs: constraints.timeout_secs,
                wall_time_limit_secs: constraints.timeout_secs * 2,
                memory_limit_mb: constraints.memory_mb,
                ..ResourcePolicy::default()
            },
            security: SecurityPolicy {
                network_enabled: constraints.network_allowed,
                ..SecurityPolicy::default()
            },
        }
    }
}
