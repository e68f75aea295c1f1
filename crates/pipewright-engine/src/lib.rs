//! Pipewright engine - executes expanded pipeline documents.
//!
//! Provides the run coordinator that:
//! - Evaluates the trigger and skips runs cheaply
//! - Expands job templates into instances before any dispatch
//! - Schedules instances with bounded parallelism, timeouts, and cancellation
//! - Aggregates job outcomes into the run verdict

pub mod coordinator;
pub mod executor;
pub mod fakes;
pub mod provision;
pub mod scheduler;
pub mod steps;

// Re-export key types
pub use coordinator::{RunCoordinator, RunOptions};
pub use executor::{ScriptExecutor, ScriptOutput, ShellExecutor};
pub use provision::{ExecutionUnit, LocalProvisioner, Provisioner};
pub use scheduler::{CancelHandle, JobScheduler};
pub use steps::{Interruption, StepRunner, StepsOutcome};
