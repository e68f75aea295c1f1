//! Sequential step execution within one job instance.

use std::time::Instant;
use tokio::sync::watch;
use tokio::time::Instant as TokioInstant;
use tracing::{info, warn};

use pipewright_core::env::build_step_env;
use pipewright_core::error::EngineError;
use pipewright_core::{JobInstance, StepResult, StepStatus};

use crate::executor::ScriptExecutor;
use crate::provision::ExecutionUnit;

/// Why a step sequence stopped before its natural end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    TimedOut,
    Canceled,
}

/// Step records plus the interruption that cut them short, if any.
///
/// `results` always has one entry per declared step: executed steps carry
/// their real outcome, everything after a failure or interruption is
/// recorded as `Skipped`.
#[derive(Debug)]
pub struct StepsOutcome {
    pub results: Vec<StepResult>,
    pub interruption: Option<Interruption>,
}

/// Runs a job instance's steps strictly in order.
pub struct StepRunner {
    output_limit: usize,
}

impl StepRunner {
    pub fn new(output_limit: usize) -> Self {
        Self { output_limit }
    }

    /// Execute the instance's steps against the given unit.
    ///
    /// Fail-fast: the first non-zero exit stops execution and the remaining
    /// steps are recorded as `Skipped`. The deadline is checked before each
    /// step and enforced hard while a step runs; dropping the in-flight
    /// execution future kills the child via `kill_on_drop`. Cancellation is
    /// observed the same way and marks the in-flight step `Canceled`.
    pub async fn run_steps(
        &self,
        instance: &JobInstance,
        executor: &dyn ScriptExecutor,
        unit: &ExecutionUnit,
        deadline: TokioInstant,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepsOutcome {
        let mut results = Vec::with_capacity(instance.steps.len());
        let mut interruption = None;
        let mut failed = false;

        for step in &instance.steps {
            if interruption.is_some() || failed {
                results.push(StepResult::skipped(&step.display_name));
                continue;
            }
            if *cancel.borrow() {
                interruption = Some(Interruption::Canceled);
                results.push(StepResult::skipped(&step.display_name));
                continue;
            }
            if TokioInstant::now() >= deadline {
                interruption = Some(Interruption::TimedOut);
                results.push(StepResult::skipped(&step.display_name));
                continue;
            }

            let env = build_step_env(&instance.resolved_env, step);
            let start = Instant::now();
            info!(job = %instance.display_name, step = %step.display_name, "Executing step");

            enum StepEnd {
                Finished(pipewright_core::Result<crate::executor::ScriptOutput>),
                DeadlineHit,
                CancelHit,
            }

            let end = tokio::select! {
                outcome = executor.execute(step, &env, unit) => StepEnd::Finished(outcome),
                _ = tokio::time::sleep_until(deadline) => StepEnd::DeadlineHit,
                _ = wait_canceled(cancel) => StepEnd::CancelHit,
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            match end {
                StepEnd::Finished(Ok(output)) => {
                    let status = if output.succeeded() {
                        StepStatus::Succeeded
                    } else {
                        failed = true;
                        StepStatus::Failed
                    };
                    results.push(StepResult {
                        display_name: step.display_name.clone(),
                        status,
                        exit_code: Some(output.exit_code),
                        output: truncate_output(output.output, self.output_limit),
                        duration_ms,
                    });
                }
                StepEnd::Finished(Err(e)) => {
                    // Spawn-level failure, distinct from a non-zero exit.
                    warn!(job = %instance.display_name, step = %step.display_name, error = %e, "Step execution error");
                    failed = true;
                    results.push(StepResult {
                        display_name: step.display_name.clone(),
                        status: StepStatus::Failed,
                        exit_code: Some(-1),
                        output: truncate_output(e.to_string(), self.output_limit),
                        duration_ms,
                    });
                }
                StepEnd::DeadlineHit => {
                    interruption = Some(Interruption::TimedOut);
                    let message = EngineError::Timeout {
                        job: instance.display_name.clone(),
                        limit_secs: instance.timeout_secs,
                    }
                    .to_string();
                    results.push(StepResult {
                        display_name: step.display_name.clone(),
                        status: StepStatus::TimedOut,
                        exit_code: None,
                        output: message,
                        duration_ms,
                    });
                }
                StepEnd::CancelHit => {
                    interruption = Some(Interruption::Canceled);
                    let message = EngineError::Canceled {
                        job: instance.display_name.clone(),
                    }
                    .to_string();
                    results.push(StepResult {
                        display_name: step.display_name.clone(),
                        status: StepStatus::Canceled,
                        exit_code: None,
                        output: message,
                        duration_ms,
                    });
                }
            }
        }

        StepsOutcome {
            results,
            interruption,
        }
    }
}

/// Resolve once the cancel flag becomes true. Never resolves otherwise,
/// including when the sender side has gone away.
pub(crate) async fn wait_canceled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn truncate_output(mut output: String, limit: usize) -> String {
    if output.len() <= limit {
        return output;
    }
    let mut cut = limit;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n[output truncated]");
    output
}
