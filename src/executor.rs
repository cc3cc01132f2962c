//! Drives one task from descriptor to terminal state.
//!
//! The executor owns the whole lifecycle: validate, acquire a session,
//! optionally clone the repository, start the agent, stream and publish
//! events, map the exit into a terminal state, and release the session on
//! every exit path. Errors fold into the returned `TaskResult`; `execute`
//! itself never fails.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::TaskError;
use crate::events::{AgentEvent, EventParser, EventSummary};
use crate::process::{ProcessCommand, ProcessRunner, StreamSource};
use crate::publisher::{EventPublisher, TaskUpdate};
use crate::repo::RepoClient;
use crate::session::{Session, SessionManager};
use crate::task::{TaskDescriptor, TaskMode, TaskResult, TaskState};
use crate::tracker::ChangeTracker;

pub struct TaskExecutor {
    config: Config,
    sessions: Arc<SessionManager>,
    publisher: Arc<EventPublisher>,
    repo: RepoClient,
}

impl TaskExecutor {
    pub fn new(
        config: Config,
        sessions: Arc<SessionManager>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        let repo = RepoClient::new(&config);
        Self {
            config,
            sessions,
            publisher,
            repo,
        }
    }

    /// Run one task to completion. Always returns a result in a terminal
    /// state; the session is released regardless of which step failed.
    pub async fn execute(
        &self,
        descriptor: TaskDescriptor,
        cancel: CancellationToken,
    ) -> TaskResult {
        let started_at = Utc::now();
        info!(task_id = %descriptor.task_id, mode = %descriptor.mode, "task received");

        // Fail fast on malformed input; no resources are committed yet.
        if let Err(err) = descriptor.validate() {
            warn!(task_id = %descriptor.task_id, error = %err, "task rejected");
            return self.finalize(
                &descriptor,
                TaskState::Failed,
                Some(err.to_string()),
                Vec::new(),
                Vec::new(),
                started_at,
            );
        }

        let session = match self.sessions.acquire(&descriptor.task_id).await {
            Ok(session) => session,
            Err(err) => {
                let err = TaskError::from(err);
                return self.finalize(
                    &descriptor,
                    TaskState::Failed,
                    Some(err.to_string()),
                    Vec::new(),
                    Vec::new(),
                    started_at,
                );
            }
        };
        self.publisher.publish(
            &descriptor.task_id,
            TaskUpdate::State {
                state: TaskState::Running,
            },
        );

        let mut events = Vec::new();
        let outcome = self
            .run_in_session(&descriptor, &session, &cancel, &mut events)
            .await;

        // Release runs unconditionally, including when the run body errored.
        // A cleanup failure is logged by the manager and does not change the
        // task's outcome.
        let _ = self.sessions.release(&session).await;

        let (status, error, artifacts) = match outcome {
            Ok(artifacts) => (TaskState::Completed, None, artifacts),
            Err(err) if err.is_cancellation() => (TaskState::Cancelled, None, Vec::new()),
            Err(err) => (TaskState::Failed, Some(err.to_string()), Vec::new()),
        };
        self.finalize(&descriptor, status, error, events, artifacts, started_at)
    }

    /// Steps 3–7: clone, start, stream, await exit. The caller owns session
    /// release and finalization.
    async fn run_in_session(
        &self,
        descriptor: &TaskDescriptor,
        session: &Session,
        cancel: &CancellationToken,
        events: &mut Vec<AgentEvent>,
    ) -> Result<Vec<String>, TaskError> {
        let mut tracker = None;
        let cwd = match &descriptor.repository_url {
            Some(url) => {
                self.publish_status(descriptor, format!("cloning repository {}", url));
                let repo_dir = session.repo_dir();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TaskError::Cancelled),
                    result = self.repo.clone_into(url, &repo_dir) => result?,
                }
                match ChangeTracker::open(&repo_dir) {
                    Ok(t) => tracker = Some(t),
                    Err(e) => {
                        warn!(task_id = %descriptor.task_id, error = %e, "change tracking unavailable")
                    }
                }
                repo_dir
            }
            None => session.workspace_dir(),
        };

        self.publish_status(descriptor, "starting agent".to_string());
        let command = build_agent_command(&self.config, descriptor, session, &cwd);
        let mut handle = ProcessRunner::start(command)?;
        info!(task_id = %descriptor.task_id, pid = handle.id(), "agent started");

        // One consumer loop feeds both the accumulator and the publisher, so
        // per-task event order matches line order. Cancellation is checked
        // first at every line boundary.
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    handle.terminate().await;
                    return Err(TaskError::Cancelled);
                }
                line = handle.next_line() => match line? {
                    Some(line) => {
                        if line.text.trim().is_empty() {
                            continue;
                        }
                        let event = match line.source {
                            StreamSource::Stdout => EventParser::parse_line(&line.text),
                            StreamSource::Stderr => AgentEvent::Error { text: line.text },
                        };
                        self.emit(descriptor, events, event);
                    }
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            handle.terminate().await;
            return Err(TaskError::Cancelled);
        }

        let status = handle.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            return Err(TaskError::Runtime {
                exit_code,
                message: failure_cause(events),
            });
        }

        let mut summary = EventSummary::default();
        for event in events.iter() {
            summary.record(event);
        }
        info!(
            task_id = %descriptor.task_id,
            events = events.len(),
            tools = summary.tools_used.len(),
            errors = summary.errors,
            "agent stream complete"
        );

        let mut artifacts = Vec::new();
        if descriptor.mode == TaskMode::Write {
            if let Some(tracker) = &tracker {
                match tracker.compute_changes() {
                    Ok(changes) => artifacts = changes.paths(),
                    Err(e) => {
                        warn!(task_id = %descriptor.task_id, error = %e, "change detection failed")
                    }
                }
            }
            // Without a repository to diff, fall back to what the event
            // stream claimed was touched.
            if artifacts.is_empty() {
                artifacts = summary.files_changed;
            }
        }
        Ok(artifacts)
    }

    /// Accumulate a line-derived event and fan it out to subscribers.
    /// Only these events end up in the task result.
    fn emit(&self, descriptor: &TaskDescriptor, events: &mut Vec<AgentEvent>, event: AgentEvent) {
        self.publisher.publish(
            &descriptor.task_id,
            TaskUpdate::Event {
                event: event.clone(),
            },
        );
        events.push(event);
    }

    /// Progress notice for subscribers only; not part of the agent's own
    /// output, so it stays out of the result's event list.
    fn publish_status(&self, descriptor: &TaskDescriptor, text: String) {
        self.publisher.publish(
            &descriptor.task_id,
            TaskUpdate::Event {
                event: AgentEvent::Status { text },
            },
        );
    }

    /// Step 9: seal the result, announce the terminal state, and drop the
    /// task's channel. No mutation after this point.
    fn finalize(
        &self,
        descriptor: &TaskDescriptor,
        status: TaskState,
        error: Option<String>,
        events: Vec<AgentEvent>,
        artifacts: Vec<String>,
        started_at: chrono::DateTime<Utc>,
    ) -> TaskResult {
        self.publisher
            .publish(&descriptor.task_id, TaskUpdate::State { state: status });
        self.publisher.close(&descriptor.task_id);
        info!(
            task_id = %descriptor.task_id,
            status = %status,
            events = events.len(),
            "task finalized"
        );
        TaskResult {
            task_id: descriptor.task_id.clone(),
            status,
            events,
            error,
            artifacts,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Step 4: the agent command line. Mode selects the tool allowlist —
/// read-only modes get no editing tools, write mode gets them but loses
/// network tools.
pub(crate) fn build_agent_command(
    config: &Config,
    descriptor: &TaskDescriptor,
    session: &Session,
    cwd: &Path,
) -> ProcessCommand {
    let mut args: Vec<String> = [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--dangerously-skip-permissions",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(turns) = descriptor.max_turns {
        args.push("--max-turns".to_string());
        args.push(turns.to_string());
    }

    if descriptor.mode.is_read_only() {
        args.extend([
            "--allowedTools".to_string(),
            "Read,Grep,Glob,LS,Bash".to_string(),
            "--disallowedTools".to_string(),
            "Write,Edit,MultiEdit".to_string(),
        ]);
    } else {
        args.extend([
            "--allowedTools".to_string(),
            "Read,Write,Edit,MultiEdit,Grep,Glob,LS,Bash".to_string(),
            "--disallowedTools".to_string(),
            "WebSearch,WebFetch".to_string(),
        ]);
    }

    let env = HashMap::from([
        ("TASK_ID".to_string(), descriptor.task_id.clone()),
        ("SESSION_ID".to_string(), session.session_id.clone()),
        (
            "WORKSPACE_DIR".to_string(),
            session.workspace_dir().to_string_lossy().into_owned(),
        ),
        (
            "ARTIFACTS_DIR".to_string(),
            session.artifacts_dir().to_string_lossy().into_owned(),
        ),
    ]);

    ProcessCommand {
        program: config.agent_cmd.clone(),
        args,
        cwd: cwd.to_path_buf(),
        env,
        input: enforced_prompt(descriptor, session),
        timeout: config.task_timeout,
    }
}

/// Mode-specific preamble prepended to the prompt before it is piped in.
fn enforced_prompt(descriptor: &TaskDescriptor, session: &Session) -> String {
    if descriptor.mode.is_read_only() {
        format!(
            "[SYSTEM: This is {} mode - a READ-ONLY operation. Do NOT make any code changes. \
             Save all outputs to {}/.]\n\n{}",
            descriptor.mode.as_str().to_uppercase(),
            session.artifacts_dir().display(),
            descriptor.prompt
        )
    } else {
        format!(
            "[SYSTEM: You MUST commit all changes and create a PR before finishing. Include \
             these as todos: git add, git commit, git push, gh pr create.]\n\n{}",
            descriptor.prompt
        )
    }
}

/// Failure cause for a non-zero exit: the last error or status the agent
/// reported, if any.
fn failure_cause(events: &[AgentEvent]) -> String {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            AgentEvent::Error { text } | AgentEvent::Status { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "agent exited with non-zero status".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn descriptor(mode: TaskMode) -> TaskDescriptor {
        TaskDescriptor {
            task_id: "t-1".to_string(),
            prompt: "do the thing".to_string(),
            mode,
            repository_url: None,
            max_turns: None,
        }
    }

    async fn session_in(dir: &Path) -> (Arc<SessionManager>, Session) {
        let manager = Arc::new(SessionManager::new(dir));
        let session = manager.acquire("t-1").await.unwrap();
        (manager, session)
    }

    #[tokio::test]
    async fn test_command_read_only_mode_restricts_tools() {
        let dir = tempdir().unwrap();
        let (_manager, session) = session_in(dir.path()).await;
        let config = Config::default();
        let cmd = build_agent_command(
            &config,
            &descriptor(TaskMode::Review),
            &session,
            &session.workspace_dir(),
        );

        let allowed_idx = cmd.args.iter().position(|a| a == "--allowedTools").unwrap();
        assert_eq!(cmd.args[allowed_idx + 1], "Read,Grep,Glob,LS,Bash");
        let disallowed_idx = cmd
            .args
            .iter()
            .position(|a| a == "--disallowedTools")
            .unwrap();
        assert_eq!(cmd.args[disallowed_idx + 1], "Write,Edit,MultiEdit");
    }

    #[tokio::test]
    async fn test_command_write_mode_permits_editing() {
        let dir = tempdir().unwrap();
        let (_manager, session) = session_in(dir.path()).await;
        let config = Config::default();
        let cmd = build_agent_command(
            &config,
            &descriptor(TaskMode::Write),
            &session,
            &session.workspace_dir(),
        );

        let allowed_idx = cmd.args.iter().position(|a| a == "--allowedTools").unwrap();
        assert!(cmd.args[allowed_idx + 1].contains("Write"));
        assert!(cmd.args[allowed_idx + 1].contains("Edit"));
        let disallowed_idx = cmd
            .args
            .iter()
            .position(|a| a == "--disallowedTools")
            .unwrap();
        assert_eq!(cmd.args[disallowed_idx + 1], "WebSearch,WebFetch");
    }

    #[tokio::test]
    async fn test_command_includes_max_turns_when_set() {
        let dir = tempdir().unwrap();
        let (_manager, session) = session_in(dir.path()).await;
        let config = Config::default();
        let mut d = descriptor(TaskMode::Ask);
        d.max_turns = Some(7);
        let cmd = build_agent_command(&config, &d, &session, &session.workspace_dir());

        let idx = cmd.args.iter().position(|a| a == "--max-turns").unwrap();
        assert_eq!(cmd.args[idx + 1], "7");

        let without = build_agent_command(
            &config,
            &descriptor(TaskMode::Ask),
            &session,
            &session.workspace_dir(),
        );
        assert!(!without.args.iter().any(|a| a == "--max-turns"));
    }

    #[tokio::test]
    async fn test_command_session_env_is_explicit() {
        let dir = tempdir().unwrap();
        let (_manager, session) = session_in(dir.path()).await;
        let config = Config::default();
        let cmd = build_agent_command(
            &config,
            &descriptor(TaskMode::Write),
            &session,
            &session.workspace_dir(),
        );
        assert_eq!(cmd.env.get("TASK_ID").unwrap(), "t-1");
        assert_eq!(cmd.env.get("SESSION_ID").unwrap(), &session.session_id);
        assert!(cmd.env.contains_key("ARTIFACTS_DIR"));
    }

    #[tokio::test]
    async fn test_prompt_preamble_varies_by_mode() {
        let dir = tempdir().unwrap();
        let (_manager, session) = session_in(dir.path()).await;

        let write = enforced_prompt(&descriptor(TaskMode::Write), &session);
        assert!(write.contains("commit all changes"));
        assert!(write.ends_with("do the thing"));

        let review = enforced_prompt(&descriptor(TaskMode::Review), &session);
        assert!(review.contains("REVIEW mode"));
        assert!(review.contains("READ-ONLY"));
        assert!(review.ends_with("do the thing"));
    }

    #[test]
    fn test_failure_cause_prefers_last_error() {
        let events = vec![
            AgentEvent::Status {
                text: "starting agent".to_string(),
            },
            AgentEvent::Error {
                text: "first error".to_string(),
            },
            AgentEvent::Error {
                text: "final error".to_string(),
            },
        ];
        assert_eq!(failure_cause(&events), "final error");
    }

    #[test]
    fn test_failure_cause_defaults_when_silent() {
        assert_eq!(failure_cause(&[]), "agent exited with non-zero status");
    }

    #[tokio::test]
    async fn test_invalid_descriptor_fails_without_session() {
        let dir = tempdir().unwrap();
        let sessions = Arc::new(SessionManager::new(dir.path()));
        let publisher = Arc::new(EventPublisher::new());
        let executor = TaskExecutor::new(Config::default(), sessions.clone(), publisher);

        let mut d = descriptor(TaskMode::Write);
        d.prompt = "   ".to_string();
        let result = executor.execute(d, CancellationToken::new()).await;

        assert_eq!(result.status, TaskState::Failed);
        assert!(result.error.unwrap().contains("prompt"));
        assert!(result.events.is_empty());
        // Validation failures never commit a workspace.
        assert_eq!(sessions.active_count(), 0);
    }
}
