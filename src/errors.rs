//! Typed error hierarchy for the conductor wrapper.
//!
//! Three enums cover the three failure surfaces:
//! - `SessionError` — workspace allocation and cleanup failures
//! - `ProcessError` — agent process launch, I/O, and timeout failures
//! - `TaskError` — terminal task failures, as surfaced in a `TaskResult`

use std::path::PathBuf;

use thiserror::Error;

/// Errors from session workspace allocation and cleanup.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already active for task {task_id}")]
    AlreadyActive { task_id: String },

    #[error("failed to create workspace at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove workspace at {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the agent process runner.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exceeded {timeout_secs}s wall-clock timeout")]
    Timeout { timeout_secs: u64 },

    #[error("process i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal task failures. Every variant maps to a `Failed` or `Cancelled`
/// status in the task result; none of these cross the publisher boundary.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task: {0}")]
    Validation(String),

    #[error(transparent)]
    Resource(#[from] SessionError),

    #[error("failed to launch agent: {0}")]
    Launch(String),

    #[error("agent timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("repository clone failed: {0}")]
    Repository(String),

    #[error("agent exited with code {exit_code}: {message}")]
    Runtime { exit_code: i32, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("task cancelled")]
    Cancelled,
}

impl From<ProcessError> for TaskError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Launch { .. } => TaskError::Launch(err.to_string()),
            ProcessError::Timeout { timeout_secs } => TaskError::Timeout { timeout_secs },
            ProcessError::Io(e) => TaskError::Internal(e.to_string()),
        }
    }
}

impl TaskError {
    /// Whether this error represents an external cancellation rather than a
    /// failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}
