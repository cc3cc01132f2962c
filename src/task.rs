//! Task domain types: descriptor, mode, state machine values, and result.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TaskError;
use crate::events::AgentEvent;

/// Capability profile for a task. Read-only modes forbid the agent's
/// mutating tools; write mode permits them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    Write,
    Review,
    Ask,
    Analyze,
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Review => "review",
            Self::Ask => "ask",
            Self::Analyze => "analyze",
        }
    }

    pub fn is_read_only(&self) -> bool {
        !matches!(self, Self::Write)
    }
}

impl FromStr for TaskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(Self::Write),
            "review" => Ok(Self::Review),
            "ask" => Ok(Self::Ask),
            "analyze" => Ok(Self::Analyze),
            _ => Err(format!("Invalid mode: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable task input, as delivered by the external queue or API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: String,
    pub prompt: String,
    pub mode: TaskMode,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
}

impl TaskDescriptor {
    /// Reject malformed descriptors before any resources are committed.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.task_id.trim().is_empty() {
            return Err(TaskError::Validation("task_id must not be empty".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(TaskError::Validation("prompt must not be empty".into()));
        }
        if self.max_turns == Some(0) {
            return Err(TaskError::Validation("max_turns must be positive".into()));
        }
        Ok(())
    }
}

/// Per-task state machine value. Transitions are one-directional:
/// `Pending → Running → {Completed | Failed | Cancelled}`, with validation
/// failures terminating straight out of `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving to `next` is a legal transition. No transition out of
    /// a terminal state is permitted.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid state: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything accumulated over a task's lifetime. Mutated only by the task
/// executor; immutable once `status` is terminal.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskState,
    pub events: Vec<AgentEvent>,
    /// Human-readable failure cause; present iff `status` is `Failed`.
    pub error: Option<String>,
    /// Workspace-relative paths produced or changed by a write-mode run.
    pub artifacts: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
