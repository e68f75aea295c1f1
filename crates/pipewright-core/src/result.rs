//! Step, job, and run result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
    Canceled,
}

/// Record of one step's execution (or of the decision not to run it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    /// Step label from the document.
    pub display_name: String,

    /// Terminal step status.
    pub status: StepStatus,

    /// Process exit code. `None` when the step never produced one
    /// (skipped, or failed before spawn).
    pub exit_code: Option<i32>,

    /// Merged stdout and stderr, truncated to the configured limit.
    pub output: String,

    /// Wall clock duration in milliseconds. Zero for skipped steps.
    pub duration_ms: u64,
}

impl StepResult {
    /// Record a step that was never attempted because an earlier step failed.
    pub fn skipped(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            status: StepStatus::Skipped,
            exit_code: None,
            output: String::new(),
            duration_ms: 0,
        }
    }
}

/// Terminal outcome of a job instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

/// Record of one job instance's execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    /// Id of the expanded instance this result belongs to.
    pub instance_id: Uuid,

    /// Instance display name (`job` or `job [variant]`).
    pub display_name: String,

    /// Terminal job status.
    pub status: JobStatus,

    /// Ordered step records, one per declared step, never omitted.
    pub step_results: Vec<StepResult>,

    /// When the instance left the queue.
    pub started_at: DateTime<Utc>,

    /// When the instance reached a terminal status.
    pub finished_at: DateTime<Utc>,

    /// Wall clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Terminal outcome of a whole run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Canceled,
    Skipped,
}

/// Aggregate record of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    /// Unique id for this run.
    pub run_id: Uuid,

    /// Digest of the document this run executed.
    pub document_digest: String,

    /// Terminal run status.
    pub status: RunStatus,

    /// One record per expanded job instance, in instance order.
    /// Empty when the trigger skipped the run.
    pub job_results: Vec<JobResult>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Wall clock duration in milliseconds.
    pub duration_ms: u64,
}

impl RunResult {
    /// Number of job instances that succeeded.
    pub fn passed_jobs(&self) -> usize {
        self.job_results
            .iter()
            .filter(|j| j.status == JobStatus::Succeeded)
            .count()
    }

    /// Number of job instances that ended in any non-success status.
    pub fn failed_jobs(&self) -> usize {
        self.job_results.len() - self.passed_jobs()
    }
}

/// Fold job outcomes into the run verdict.
///
/// All succeeded means the run succeeded; any failure or timeout fails the
/// run; otherwise any cancellation marks the run canceled.
pub fn aggregate_status(job_results: &[JobResult]) -> RunStatus {
    let any_failed = job_results
        .iter()
        .any(|j| matches!(j.status, JobStatus::Failed | JobStatus::TimedOut));
    if any_failed {
        return RunStatus::Failed;
    }
    let any_canceled = job_results
        .iter()
        .any(|j| j.status == JobStatus::Canceled);
    if any_canceled {
        return RunStatus::Canceled;
    }
    RunStatus::Succeeded
}
