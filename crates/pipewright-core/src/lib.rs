//! Pipewright core - pipeline document model and pure evaluation logic.
//!
//! Provides the building blocks the engine crate executes:
//! - Pipeline documents (triggers, job templates, matrices, steps)
//! - Trigger evaluation against a change context
//! - Matrix expansion into concrete job instances
//! - Per-step environment construction
//! - Result records for steps, jobs, and whole runs

pub mod document;
pub mod env;
pub mod error;
pub mod matrix;
pub mod result;
pub mod telemetry;
pub mod trigger;

// Re-export key types
pub use document::{
    ChangeContext, EnvMap, JobTemplate, Matrix, MatrixVariant, PipelineDocument, PlatformSpec,
    StepSpec, TriggerRule,
};
pub use error::{EngineError, Result};
pub use matrix::{expand, JobInstance, ResolvedPlatform};
pub use result::{
    aggregate_status, JobResult, JobStatus, RunResult, RunStatus, StepResult, StepStatus,
};
pub use telemetry::init_tracing;
pub use trigger::{evaluate, GlobPolicy};
