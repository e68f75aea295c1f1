//! Error types for pipeline engine operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provisioning failed for {job}: {message}")]
    Provisioning { job: String, message: String },

    #[error("Script execution failed for step '{step}': {source}")]
    ScriptExecution {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Job '{job}' exceeded its timeout of {limit_secs}s")]
    Timeout { job: String, limit_secs: u64 },

    #[error("Job '{job}' was canceled")]
    Canceled { job: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pipeline engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
