//! Bounded-concurrency job dispatch.
//!
//! Each expanded instance moves through `Queued -> Provisioning -> Running`
//! and ends in exactly one of `Succeeded`, `Failed`, `TimedOut`, or
//! `Canceled`. A semaphore models the pool of build agents; queued instances
//! wait for a permit in FIFO order, and a watch channel broadcasts
//! cancellation to every instance at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pipewright_core::{JobInstance, JobResult, JobStatus, StepResult, StepStatus};

use crate::executor::ScriptExecutor;
use crate::provision::Provisioner;
use crate::steps::{wait_canceled, Interruption, StepRunner};

/// Cloneable handle that cancels a run in flight.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new(tx: watch::Sender<bool>) -> Self {
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent; in-flight jobs tear down, queued
    /// jobs are reported `Canceled` without starting.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Dispatches job instances with a fixed parallelism bound.
pub struct JobScheduler {
    executor: Arc<dyn ScriptExecutor>,
    provisioner: Arc<dyn Provisioner>,
    max_concurrency: usize,
    output_limit: usize,
    cancel_rx: watch::Receiver<bool>,
}

impl JobScheduler {
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        provisioner: Arc<dyn Provisioner>,
        max_concurrency: usize,
        output_limit: usize,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            executor,
            provisioner,
            max_concurrency,
            output_limit,
            cancel_rx,
        }
    }

    /// Run all instances and return one result per instance, in input order.
    ///
    /// At most `max_concurrency` instances run at once. Every instance gets
    /// a result whatever happens to it; a panicking worker task is folded
    /// into a synthetic `Failed` result rather than tearing down siblings.
    pub async fn schedule(&self, instances: Vec<JobInstance>) -> Vec<JobResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut identities = Vec::with_capacity(instances.len());
        let mut tasks = Vec::with_capacity(instances.len());

        for instance in instances {
            let identity = (
                instance.id,
                instance.display_name.clone(),
                instance
                    .steps
                    .iter()
                    .map(|s| s.display_name.clone())
                    .collect::<Vec<_>>(),
            );
            let executor = Arc::clone(&self.executor);
            let provisioner = Arc::clone(&self.provisioner);
            let semaphore = Arc::clone(&semaphore);
            let cancel_rx = self.cancel_rx.clone();
            let output_limit = self.output_limit;

            identities.push(identity);
            tasks.push(tokio::spawn(run_instance(
                instance,
                executor,
                provisioner,
                semaphore,
                cancel_rx,
                output_limit,
            )));
        }

        let joined = join_all(tasks).await;

        identities
            .into_iter()
            .zip(joined)
            .map(|(identity, join_result)| match join_result {
                Ok(result) => result,
                Err(e) => {
                    let (instance_id, display_name, step_names) = identity;
                    warn!(job = %display_name, error = %e, "Job worker task failed");
                    synthetic_failed_result(instance_id, display_name, &step_names, e.to_string())
                }
            })
            .collect()
    }
}

async fn run_instance(
    instance: JobInstance,
    executor: Arc<dyn ScriptExecutor>,
    provisioner: Arc<dyn Provisioner>,
    semaphore: Arc<Semaphore>,
    mut cancel_rx: watch::Receiver<bool>,
    output_limit: usize,
) -> JobResult {
    debug!(job = %instance.display_name, "Queued");

    // Queued: wait for an agent slot or cancellation, whichever comes first.
    let permit = tokio::select! {
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return canceled_without_start(&instance),
        },
        _ = wait_canceled(&mut cancel_rx) => {
            info!(job = %instance.display_name, "Canceled while queued");
            return canceled_without_start(&instance);
        }
    };
    let _permit = permit;

    let started_at = Utc::now();
    let start = std::time::Instant::now();
    let deadline = TokioInstant::now() + Duration::from_secs(instance.timeout_secs);

    debug!(job = %instance.display_name, "Provisioning");
    let unit = match provisioner
        .acquire(&instance.display_name, &instance.resolved_platform)
        .await
    {
        Ok(unit) => unit,
        Err(e) => {
            warn!(job = %instance.display_name, error = %e, "Provisioning failed");
            let duration_ms = start.elapsed().as_millis() as u64;
            let mut step_results = vec![StepResult {
                display_name: "provision agent".to_string(),
                status: StepStatus::Failed,
                exit_code: None,
                output: e.to_string(),
                duration_ms,
            }];
            step_results.extend(
                instance
                    .steps
                    .iter()
                    .map(|s| StepResult::skipped(&s.display_name)),
            );
            return JobResult {
                instance_id: instance.id,
                display_name: instance.display_name.clone(),
                status: JobStatus::Failed,
                step_results,
                started_at,
                finished_at: Utc::now(),
                duration_ms,
            };
        }
    };

    debug!(job = %instance.display_name, unit = %unit.id, "Running");
    let runner = StepRunner::new(output_limit);
    let outcome = runner
        .run_steps(&instance, executor.as_ref(), &unit, deadline, &mut cancel_rx)
        .await;

    if let Err(e) = provisioner.release(unit).await {
        warn!(job = %instance.display_name, error = %e, "Release failed");
    }

    let status = match outcome.interruption {
        Some(Interruption::TimedOut) => JobStatus::TimedOut,
        Some(Interruption::Canceled) => JobStatus::Canceled,
        None => {
            let any_failed = outcome
                .results
                .iter()
                .any(|s| s.status == StepStatus::Failed);
            if any_failed {
                JobStatus::Failed
            } else {
                JobStatus::Succeeded
            }
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(job = %instance.display_name, status = ?status, duration_ms, "Job finished");

    JobResult {
        instance_id: instance.id,
        display_name: instance.display_name,
        status,
        step_results: outcome.results,
        started_at,
        finished_at: Utc::now(),
        duration_ms,
    }
}

fn canceled_without_start(instance: &JobInstance) -> JobResult {
    let now = Utc::now();
    JobResult {
        instance_id: instance.id,
        display_name: instance.display_name.clone(),
        status: JobStatus::Canceled,
        step_results: instance
            .steps
            .iter()
            .map(|s| StepResult::skipped(&s.display_name))
            .collect(),
        started_at: now,
        finished_at: now,
        duration_ms: 0,
    }
}

fn synthetic_failed_result(
    instance_id: Uuid,
    display_name: String,
    step_names: &[String],
    error: String,
) -> JobResult {
    let now = Utc::now();
    let mut step_results = vec![StepResult {
        display_name: "job worker".to_string(),
        status: StepStatus::Failed,
        exit_code: None,
        output: error,
        duration_ms: 0,
    }];
    step_results.extend(step_names.iter().map(StepResult::skipped));
    JobResult {
        instance_id,
        display_name,
        status: JobStatus::Failed,
        step_results,
        started_at: now,
        finished_at: now,
        duration_ms: 0,
    }
}
