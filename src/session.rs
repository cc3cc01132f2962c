//! Per-task isolated filesystem workspaces.
//!
//! Each running task owns exactly one session directory under the configured
//! base dir. The executor acquires a session before starting the agent and
//! releases it unconditionally when the task terminates, whatever the
//! outcome.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::SessionError;

/// An exclusively-owned workspace for one task.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub task_id: String,
    root: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the agent works; the cloned repository lives underneath.
    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    /// Where read-only modes are told to save their outputs.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.workspace_dir().join("repo")
    }
}

/// Allocates and removes session workspaces, enforcing at most one live
/// session per task id.
pub struct SessionManager {
    base_dir: PathBuf,
    active: Mutex<HashSet<String>>,
}

impl SessionManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Create a fresh, empty workspace exclusively for `task_id`.
    ///
    /// Fails if a session for that task id is already active or the
    /// filesystem is unwritable. On a creation error the task id is
    /// deregistered again so a retry is possible.
    pub async fn acquire(&self, task_id: &str) -> Result<Session, SessionError> {
        {
            let mut active = self.active.lock().expect("session registry poisoned");
            if !active.insert(task_id.to_string()) {
                return Err(SessionError::AlreadyActive {
                    task_id: task_id.to_string(),
                });
            }
        }

        let session_id = format!("{}-{}", task_id, &Uuid::new_v4().simple().to_string()[..8]);
        let root = self.base_dir.join(&session_id);
        let session = Session {
            session_id,
            task_id: task_id.to_string(),
            root,
            created_at: Utc::now(),
        };

        for dir in [
            session.root().to_path_buf(),
            session.workspace_dir(),
            session.artifacts_dir(),
            session.logs_dir(),
        ] {
            if let Err(source) = tokio::fs::create_dir_all(&dir).await {
                self.deregister(task_id);
                return Err(SessionError::Create { path: dir, source });
            }
        }

        info!(task_id, session_id = %session.session_id, "session created");
        Ok(session)
    }

    /// Remove the session workspace recursively and deregister the task id.
    ///
    /// Idempotent: releasing an already-removed session succeeds. The task
    /// id is deregistered even when removal fails, so a stuck directory
    /// cannot wedge the task id forever.
    pub async fn release(&self, session: &Session) -> Result<(), SessionError> {
        let result = match tokio::fs::remove_dir_all(session.root()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Cleanup {
                path: session.root().to_path_buf(),
                source,
            }),
        };
        self.deregister(&session.task_id);

        match &result {
            Ok(()) => info!(task_id = %session.task_id, "session released"),
            Err(e) => warn!(task_id = %session.task_id, error = %e, "session cleanup failed"),
        }
        result
    }

    /// Number of currently active sessions.
    pub fn active_count(&self) -> usize {
        self.active.lock().expect("session registry poisoned").len()
    }

    fn deregister(&self, task_id: &str) {
        self.active
            .lock()
            .expect("session registry poisoned")
            .remove(task_id);
    }
}
