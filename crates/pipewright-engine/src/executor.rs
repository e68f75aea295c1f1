//! Script execution.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use pipewright_core::error::{EngineError, Result};
use pipewright_core::{EnvMap, StepSpec};

use crate::provision::ExecutionUnit;

/// Captured outcome of a finished script.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Process exit code (0 = success).
    pub exit_code: i32,

    /// Merged stdout and stderr.
    pub output: String,
}

impl ScriptOutput {
    /// Whether the script exited cleanly.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one opaque script body inside an execution unit.
///
/// Implementations never interpret the script; they hand it to a shell (or
/// record it, for fakes) and report the exit code and captured output.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &StepSpec,
        env: &EnvMap,
        unit: &ExecutionUnit,
    ) -> Result<ScriptOutput>;
}

/// Executor backed by the local `sh`.
///
/// The child inherits nothing: the environment is cleared and replaced with
/// the step's resolved snapshot, and the working directory is the unit's
/// private scratch dir. `kill_on_drop` ensures a hard timeout cannot leak
/// the child process.
#[derive(Debug, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScriptExecutor for ShellExecutor {
    async fn execute(
        &self,
        step: &StepSpec,
        env: &EnvMap,
        unit: &ExecutionUnit,
    ) -> Result<ScriptOutput> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(&step.script)
            .current_dir(&unit.workdir)
            .env_clear()
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::ScriptExecution {
                step: step.display_name.clone(),
                source,
            })?;

        let output = child.wait_with_output().await?;

        let exit_code = output.status.code().unwrap_or(-1);
        let mut merged = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !merged.is_empty() && !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(&stderr);
        }

        Ok(ScriptOutput {
            exit_code,
            output: merged,
        })
    }
}
