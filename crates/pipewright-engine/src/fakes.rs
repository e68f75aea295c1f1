//! In-memory fakes for the engine's capability traits (testing only)
//!
//! Provides `FakeExecutor` and `FakeProvisioner` that satisfy the trait
//! contracts without spawning processes or touching the filesystem.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use pipewright_core::error::{EngineError, Result};
use pipewright_core::{EnvMap, ResolvedPlatform, StepSpec};

use crate::executor::{ScriptExecutor, ScriptOutput};
use crate::provision::{ExecutionUnit, Provisioner};

// ---------------------------------------------------------------------------
// FakeExecutor
// ---------------------------------------------------------------------------

/// Scripted behavior for one step, keyed by display name.
#[derive(Debug, Clone)]
pub struct StepBehavior {
    /// Exit code to report.
    pub exit_code: i32,

    /// Output to report.
    pub output: String,

    /// Simulated execution time.
    pub latency: Duration,

    /// When set, `execute` fails at spawn level instead of returning output.
    pub spawn_error: bool,
}

impl Default for StepBehavior {
    fn default() -> Self {
        Self {
            exit_code: 0,
            output: String::new(),
            latency: Duration::ZERO,
            spawn_error: false,
        }
    }
}

impl StepBehavior {
    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::default()
        }
    }
}

/// Record of one fake execution.
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    pub display_name: String,
    pub env: EnvMap,
}

/// Executor that plays back scripted step outcomes.
///
/// Steps without a scripted behavior succeed immediately with empty output.
/// Tracks every executed step (with its environment snapshot) and the peak
/// number of concurrently executing steps, which doubles as the scheduler's
/// concurrency high-water mark when each job runs one step.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    behaviors: Mutex<HashMap<String, StepBehavior>>,
    executed: Mutex<Vec<ExecutedStep>>,
    in_flight: Mutex<usize>,
    high_water: Mutex<usize>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of a step by display name.
    pub fn set_behavior(&self, display_name: impl Into<String>, behavior: StepBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(display_name.into(), behavior);
    }

    /// Display names of executed steps, in execution order.
    pub fn executed_steps(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.display_name.clone())
            .collect()
    }

    /// Environment snapshot seen by the first execution of a step.
    pub fn env_for(&self, display_name: &str) -> Option<EnvMap> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.display_name == display_name)
            .map(|e| e.env.clone())
    }

    /// Peak number of steps executing at the same time.
    pub fn max_in_flight(&self) -> usize {
        *self.high_water.lock().unwrap()
    }
}

#[async_trait]
impl ScriptExecutor for FakeExecutor {
    async fn execute(
        &self,
        step: &StepSpec,
        env: &EnvMap,
        _unit: &ExecutionUnit,
    ) -> Result<ScriptOutput> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&step.display_name)
            .cloned()
            .unwrap_or_default();

        if behavior.spawn_error {
            return Err(EngineError::ScriptExecution {
                step: step.display_name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "fake spawn failure"),
            });
        }

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            *in_flight += 1;
            let mut high_water = self.high_water.lock().unwrap();
            *high_water = (*high_water).max(*in_flight);
        }
        self.executed.lock().unwrap().push(ExecutedStep {
            display_name: step.display_name.clone(),
            env: env.clone(),
        });

        if !behavior.latency.is_zero() {
            tokio::time::sleep(behavior.latency).await;
        }

        *self.in_flight.lock().unwrap() -= 1;

        Ok(ScriptOutput {
            exit_code: behavior.exit_code,
            output: behavior.output,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeProvisioner
// ---------------------------------------------------------------------------

/// Provisioner that hands out detached units and counts pairing.
///
/// Acquire failures can be injected per job display name; everything else
/// succeeds with a unit rooted at the system temp dir.
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    fail_for: Mutex<HashSet<String>>,
    acquired: Mutex<usize>,
    released: Mutex<usize>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `acquire` fail for the given job display name.
    pub fn fail_acquire_for(&self, job: impl Into<String>) {
        self.fail_for.lock().unwrap().insert(job.into());
    }

    pub fn acquired_count(&self) -> usize {
        *self.acquired.lock().unwrap()
    }

    pub fn released_count(&self) -> usize {
        *self.released.lock().unwrap()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn acquire(&self, job: &str, platform: &ResolvedPlatform) -> Result<ExecutionUnit> {
        if self.fail_for.lock().unwrap().contains(job) {
            return Err(EngineError::Provisioning {
                job: job.to_string(),
                message: "no agent available".to_string(),
            });
        }
        *self.acquired.lock().unwrap() += 1;
        Ok(ExecutionUnit::detached(
            platform.pool_image.clone(),
            std::env::temp_dir(),
        ))
    }

    async fn release(&self, _unit: ExecutionUnit) -> Result<()> {
        *self.released.lock().unwrap() += 1;
        Ok(())
    }
}
