//! Run orchestration.
//!
//! The coordinator owns a run from trigger to verdict: it validates and
//! expands the whole document before anything executes, dispatches the
//! expanded instances once, and is the only place the final verdict is
//! emitted.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use pipewright_core::error::Result;
use pipewright_core::{
    aggregate_status, evaluate, expand, ChangeContext, GlobPolicy, JobInstance, PipelineDocument,
    RunResult, RunStatus,
};

use crate::executor::ScriptExecutor;
use crate::provision::Provisioner;
use crate::scheduler::{CancelHandle, JobScheduler};

/// Per-run knobs supplied by the host.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// How directory globs in trigger exclusions treat nested paths.
    pub glob_policy: GlobPolicy,

    /// Override for the document's `max_concurrency`.
    pub max_concurrency: Option<usize>,

    /// Per-step output truncation bound in bytes.
    pub output_limit_bytes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            glob_policy: GlobPolicy::Shallow,
            max_concurrency: None,
            output_limit_bytes: 64 * 1024,
        }
    }
}

/// Orchestrates pipeline runs end to end.
pub struct RunCoordinator {
    executor: Arc<dyn ScriptExecutor>,
    provisioner: Arc<dyn Provisioner>,
    options: RunOptions,
    cancel: CancelHandle,
    cancel_rx: watch::Receiver<bool>,
}

impl RunCoordinator {
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        provisioner: Arc<dyn Provisioner>,
        options: RunOptions,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            executor,
            provisioner,
            options,
            cancel: CancelHandle::new(tx),
            cancel_rx: rx,
        }
    }

    /// Handle for canceling the run from another task (e.g. a signal
    /// handler). Valid before and during `run`.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Validate and expand without executing anything.
    pub fn plan(&self, document: &PipelineDocument) -> Result<Vec<JobInstance>> {
        document.validate()?;
        let mut instances = Vec::new();
        for template in &document.jobs {
            instances.extend(expand(template, &document.variables)?);
        }
        Ok(instances)
    }

    /// Execute one run of the document against the given change.
    ///
    /// Configuration errors (validation, expansion) abort before any
    /// dispatch. A change the trigger rejects produces a `Skipped` result
    /// with no job records.
    pub async fn run(
        &self,
        document: &PipelineDocument,
        change: &ChangeContext,
    ) -> Result<RunResult> {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        document.validate()?;
        let document_digest = document.digest()?;

        info!(run_id = %run_id, pipeline = %document.name, branch = %change.branch, "Starting pipeline run");

        if !evaluate(change, &document.trigger, self.options.glob_policy) {
            info!(run_id = %run_id, branch = %change.branch, "Trigger skipped the run");
            return Ok(RunResult {
                run_id,
                document_digest,
                status: RunStatus::Skipped,
                job_results: vec![],
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        // Expand every template before dispatching anything, so a malformed
        // matrix fails the run without executing a single step.
        let mut instances = Vec::new();
        for template in &document.jobs {
            instances.extend(expand(template, &document.variables)?);
        }

        let max_concurrency = self
            .options
            .max_concurrency
            .unwrap_or(document.max_concurrency);
        info!(
            run_id = %run_id,
            instances = instances.len(),
            max_concurrency,
            "Dispatching job instances"
        );

        let scheduler = JobScheduler::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.provisioner),
            max_concurrency,
            self.options.output_limit_bytes,
            self.cancel_rx.clone(),
        );
        let job_results = scheduler.schedule(instances).await;

        let status = aggregate_status(&job_results);
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = RunResult {
            run_id,
            document_digest,
            status,
            job_results,
            started_at,
            duration_ms,
        };

        match status {
            RunStatus::Succeeded => {
                info!(run_id = %run_id, passed = result.passed_jobs(), duration_ms, "Pipeline run succeeded")
            }
            RunStatus::Failed => {
                error!(run_id = %run_id, failed = result.failed_jobs(), duration_ms, "Pipeline run failed")
            }
            RunStatus::Canceled => {
                info!(run_id = %run_id, duration_ms, "Pipeline run canceled")
            }
            RunStatus::Skipped => {}
        }

        Ok(result)
    }
}
