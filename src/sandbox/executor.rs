//! OS-process sandbox for capability execution.
//!
//! Every execution gets a fresh temp directory holding the capability
//! source, its arguments and a generated runner script. The runner is
//! launched as a `python3` child with a cleared environment and
//! rlimit ceilings (CPU time, address space) applied between fork and
//! exec. A wall-clock timeout kills the child; the temp directory is
//! removed on every path, including panics, via `TempDir` drop.
//!
//! The runner invokes the artifact's declared entry point only - it
//! never scans the loaded module for callables.

use super::policy::SandboxPolicy;
use crate::registry::Artifact;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const RUNNER_FILE: &str = "runner.py";
const CODE_FILE: &str = "tool_code.py";
const ARGS_FILE: &str = "args.json";

/// Terminal state of one sandboxed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

/// Outcome of one sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Parsed result payload, present on success
    pub result: Option<Value>,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Process-isolation executor.
pub struct SandboxExecutor {
    python_bin: String,
    default_policy: SandboxPolicy,
}

impl SandboxExecutor {
    pub fn new(default_policy: SandboxPolicy) -> Self {
        Self {
            python_bin: "python3".to_string(),
            default_policy,
        }
    }

    /// Override the interpreter binary.
    pub fn with_interpreter(mut self, bin: impl Into<String>) -> Self {
        self.python_bin = bin.into();
        self
    }

    /// Run an artifact's entry point against `args`. `policy`
    /// overrides the executor default when given.
    ///
    /// Never fails: preparation and spawn errors come back as
    /// `status: error` results, same as failures inside the child.
    pub async fn execute(
        &self,
        artifact: &Artifact,
        args: &Value,
        policy: Option<&SandboxPolicy>,
    ) -> ExecutionResult {
        let policy = policy.unwrap_or(&self.default_policy);
        let started = Instant::now();

        match self.run(artifact, args, policy).await {
            Ok(result) => result,
            Err(e) => {
                warn!(entry_point = %artifact.entry_point, error = %e, "sandbox setup failed");
                ExecutionResult {
                    status: ExecutionStatus::Error,
                    result: None,
                    error: Some(format!("{:#}", e)),
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }

    async fn run(
        &self,
        artifact: &Artifact,
        args: &Value,
        policy: &SandboxPolicy,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();

        // Dropped on every exit path, removing the directory
        let workdir = TempDir::new().context("creating sandbox directory")?;
        self.stage(&workdir, artifact, args)?;

        let mut cmd = Command::new(&self.python_bin);
        cmd.arg(RUNNER_FILE)
            .current_dir(workdir.path())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", workdir.path())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        apply_rlimits(&mut cmd, policy);

        let mut child = cmd.spawn().context("spawning sandbox process")?;
        // Drain pipes concurrently so a killed child still yields
        // whatever it wrote before the deadline
        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());
        let wall = Duration::from_secs(policy.resources.wall_time_limit_secs);

        let exit = match tokio::time::timeout(wall, child.wait()).await {
            Ok(status) => Some(status.context("waiting for sandbox process")?),
            Err(_) => {
                let _ = child.kill().await;
                None
            }
        };

        let max = policy.resources.max_output_bytes;
        let stdout = truncate_output(&stdout_task.await.unwrap_or_default(), max);
        let stderr = truncate_output(&stderr_task.await.unwrap_or_default(), max);
        let duration_ms = started.elapsed().as_millis() as u64;

        let Some(exit) = exit else {
            warn!(
                entry_point = %artifact.entry_point,
                limit_secs = policy.resources.wall_time_limit_secs,
                "sandbox execution timed out"
            );
            return Ok(ExecutionResult {
                status: ExecutionStatus::Timeout,
                result: None,
                error: Some(format!(
                    "execution exceeded {} second wall-clock limit",
                    policy.resources.wall_time_limit_secs
                )),
                stdout,
                stderr,
                duration_ms,
            });
        };

        if !exit.success() {
            let detail = match exit.code() {
                Some(code) => format!("sandbox process exited with code {}", code),
                None => "sandbox process killed by signal".to_string(),
            };
            return Ok(ExecutionResult {
                status: ExecutionStatus::Error,
                result: None,
                error: Some(detail),
                stdout,
                stderr,
                duration_ms,
            });
        }

        debug!(
            entry_point = %artifact.entry_point,
            duration_ms, "sandbox execution completed"
        );
        Ok(interpret_stdout(stdout, stderr, duration_ms))
    }

    /// Write the capability source, arguments and runner into the
    /// execution directory.
    fn stage(&self, workdir: &TempDir, artifact: &Artifact, args: &Value) -> Result<()> {
        let root: PathBuf = workdir.path().to_path_buf();
        std::fs::write(root.join(CODE_FILE), &artifact.code)?;
        std::fs::write(root.join(ARGS_FILE), serde_json::to_vec(args)?)?;
        std::fs::write(root.join(RUNNER_FILE), runner_script(&artifact.entry_point))?;
        Ok(())
    }
}

/// Read a child pipe to the end on its own task.
fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

#[cfg(unix)]
fn apply_rlimits(cmd: &mut Command, policy: &SandboxPolicy) {
    use nix::sys::resource::{setrlimit, Resource};

    let cpu = policy.resources.cpu_time_limit_secs;
    let mem = policy.resources.memory_limit_mb * 1024 * 1024;

    // Runs between fork and exec in the child
    unsafe {
        cmd.pre_exec(move || {
            setrlimit(Resource::RLIMIT_CPU, cpu, cpu).map_err(std::io::Error::from)?;
            setrlimit(Resource::RLIMIT_AS, mem, mem).map_err(std::io::Error::from)?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_rlimits(_cmd: &mut Command, _policy: &SandboxPolicy) {}

/// The runner invokes the declared entry point with the decoded
/// arguments and emits exactly one JSON object on stdout.
fn runner_script(entry_point: &str) -> String {
    format!(
        r#"import json
import sys

import tool_code

with open("args.json") as f:
    args = json.load(f)

fn = getattr(tool_code, {entry:?}, None)
if fn is None or not callable(fn):
    print(json.dumps({{"status": "error", "error": "entry point not found: {entry}"}}))
    sys.exit(0)

try:
    result = fn(args)
except Exception as exc:
    print(json.dumps({{"status": "error", "error": f"{{type(exc).__name__}}: {{exc}}"}}))
    sys.exit(0)

print(json.dumps({{"status": "success", "result": result}}, default=str))
"#,
        entry = entry_point
    )
}

/// Interpret the runner's stdout. The last non-empty line should be a
/// JSON envelope; anything else is wrapped as a plain-text success so
/// print-style capabilities still produce a result.
fn interpret_stdout(stdout: String, stderr: String, duration_ms: u64) -> ExecutionResult {
    let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());

    if let Some(envelope) = last_line.and_then(|l| serde_json::from_str::<Value>(l).ok()) {
        if let Some(status) = envelope.get("status").and_then(Value::as_str) {
            let is_error = status == "error";
            return ExecutionResult {
                status: if is_error {
                    ExecutionStatus::Error
                } else {
                    ExecutionStatus::Success
                },
                result: envelope.get("result").cloned(),
                error: envelope
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                stdout,
                stderr,
                duration_ms,
            };
        }
    }

    ExecutionResult {
        status: ExecutionStatus::Success,
        result: Some(serde_json::json!({ "output": stdout.trim() })),
        error: None,
        stdout,
        stderr,
        duration_ms,
    }
}

fn truncate_output(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        text.into_owned()
    } else {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated]", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilitySpec;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn artifact(code: &str, entry: &str) -> Artifact {
        Artifact::python_function(
            code.to_string(),
            CapabilitySpec::new(entry, "test capability"),
            entry.to_string(),
        )
    }

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxPolicy::strict())
    }

    #[tokio::test]
    async fn test_successful_execution_round_trips_args() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }

        let artifact = artifact(
            "def echo(input_data):\n    return {\"status\": \"success\", \"data\": input_data}\n",
            "echo",
        );
        let args = serde_json::json!({"value": 42});
        let result = executor().execute(&artifact, &args, None).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        let payload = result.result.unwrap();
        assert_eq!(payload["data"]["value"], 42);
    }

    #[tokio::test]
    async fn test_exception_becomes_error_result() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }

        let artifact = artifact(
            "def boom(input_data):\n    raise ValueError(\"bad input\")\n",
            "boom",
        );
        let result = executor()
            .execute(&artifact, &serde_json::json!({}), None)
            .await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("ValueError"));
    }

    #[tokio::test]
    async fn test_missing_entry_point_is_error() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }

        let artifact = artifact("def other(input_data):\n    return input_data\n", "missing");
        let result = executor()
            .execute(&artifact, &serde_json::json!({}), None)
            .await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("entry point not found"));
    }

    #[tokio::test]
    async fn test_wall_clock_timeout_kills_child() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }

        let artifact = artifact(
            "import time\n\ndef sleepy(input_data):\n    print(\"started\", flush=True)\n    time.sleep(300)\n",
            "sleepy",
        );
        let mut policy = SandboxPolicy::strict();
        policy.resources.wall_time_limit_secs = 1;

        let started = Instant::now();
        let result = executor()
            .execute(&artifact, &serde_json::json!({}), Some(&policy))
            .await;

        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.error.unwrap().contains("wall-clock"));
        // Output written before the deadline survives the kill
        assert!(result.stdout.contains("started"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_error_result() {
        let artifact = artifact("def noop(input_data):\n    return {}\n", "noop");
        let executor = SandboxExecutor::new(SandboxPolicy::strict())
            .with_interpreter("/nonexistent/python3");

        let result = executor.execute(&artifact, &serde_json::json!({}), None).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("spawning"));
    }

    #[test]
    fn test_plain_text_stdout_wrapped_as_success() {
        let result = interpret_stdout("hello world\n".to_string(), String::new(), 5);
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.result.unwrap()["output"], "hello world");
    }

    #[test]
    fn test_truncate_output_caps_length() {
        let long = vec![b'x'; 100];
        let out = truncate_output(&long, 10);
        assert!(out.starts_with("xxxxxxxxxx"));
        assert!(out.ends_with("[truncated]"));
    }
}
