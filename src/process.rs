//! Launches the external agent process and exposes its output as a live
//! line stream.
//!
//! Stdout and stderr are drained by independent reader tasks feeding one
//! channel, so the child can never deadlock writing to a full pipe while the
//! parent reads the other one. The optional wall-clock timeout is enforced
//! here: when it expires during a read or wait, the process is killed and
//! `ProcessError::Timeout` surfaces to the caller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::errors::ProcessError;
use crate::events::LineAssembler;

const LINE_CHANNEL_CAPACITY: usize = 256;
const READ_CHUNK_SIZE: usize = 4096;

/// Which pipe a line came from. Interleaving across the two streams is not
/// guaranteed to reflect emission order; each stream's own order is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub source: StreamSource,
    pub text: String,
}

/// Everything needed to launch one agent process. Built explicitly by the
/// caller — the runner performs no ambient environment lookups.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    /// Written to the child's stdin, which is then closed.
    pub input: String,
    pub timeout: Option<Duration>,
}

pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn the process, feed it `input` on stdin, and return a handle over
    /// its merged line stream and exit status.
    pub fn start(command: ProcessCommand) -> Result<ProcessHandle, ProcessError> {
        let deadline = command.timeout.map(|t| Instant::now() + t);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Launch {
                program: command.program.clone(),
                source,
            })?;

        debug!(program = %command.program, pid = child.id(), "agent process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            let input = command.input;
            tokio::spawn(async move {
                // A child that exits without reading its stdin produces a
                // broken pipe here; that is its prerogative.
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "failed to write prompt to agent stdin");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, StreamSource::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, StreamSource::Stderr, tx);
        }

        Ok(ProcessHandle {
            child,
            lines: rx,
            deadline,
            timeout: command.timeout,
        })
    }
}

/// Read raw chunks from one pipe, split them on newline boundaries, and
/// forward complete lines. Exits when the pipe closes or the receiver is
/// dropped.
fn spawn_reader<R>(reader: R, source: StreamSource, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut assembler = LineAssembler::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for text in assembler.push(&buf[..n]) {
                        if tx.send(OutputLine { source, text }).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "agent output read error");
                    break;
                }
            }
        }
        if let Some(text) = assembler.finish() {
            let _ = tx.send(OutputLine { source, text }).await;
        }
    });
}

/// Handle over a running agent process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    lines: mpsc::Receiver<OutputLine>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl ProcessHandle {
    /// Next output line, or `None` once both pipes have closed. The stream
    /// is live and finite; it cannot be restarted.
    pub async fn next_line(&mut self) -> Result<Option<OutputLine>, ProcessError> {
        match self.deadline {
            Some(deadline) => match timeout_at(deadline, self.lines.recv()).await {
                Ok(line) => Ok(line),
                Err(_) => {
                    self.terminate().await;
                    Err(self.timeout_error())
                }
            },
            None => Ok(self.lines.recv().await),
        }
    }

    /// Wait for the process to exit. A non-zero exit code is not an error
    /// here — the caller decides what it means.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        match self.deadline {
            Some(deadline) => match timeout_at(deadline, self.child.wait()).await {
                Ok(status) => Ok(status?),
                Err(_) => {
                    self.terminate().await;
                    Err(self.timeout_error())
                }
            },
            None => Ok(self.child.wait().await?),
        }
    }

    /// Kill the process and reap it. Used for cancellation and timeouts;
    /// safe to call after the process has already exited.
    pub async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "kill after exit");
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn timeout_error(&self) -> ProcessError {
        ProcessError::Timeout {
            timeout_secs: self.timeout.map(|t| t.as_secs()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, cwd: &std::path::Path, timeout: Option<Duration>) -> ProcessCommand {
        ProcessCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: cwd.to_path_buf(),
            env: HashMap::new(),
            input: String::new(),
            timeout,
        }
    }

    async fn collect_lines(handle: &mut ProcessHandle) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        while let Some(line) = handle.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_stdout_lines_arrive_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle =
            ProcessRunner::start(sh("echo one; echo two; echo three", dir.path(), None)).unwrap();
        let lines = collect_lines(&mut handle).await;
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(lines.iter().all(|l| l.source == StreamSource::Stdout));
        assert!(handle.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_input_is_piped_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = sh("cat", dir.path(), None);
        cmd.input = "hello\nworld\n".to_string();
        let mut handle = ProcessRunner::start(cmd).unwrap();
        let lines = collect_lines(&mut handle).await;
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn test_stderr_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle =
            ProcessRunner::start(sh("echo out; echo err >&2", dir.path(), None)).unwrap();
        let lines = collect_lines(&mut handle).await;
        assert!(
            lines
                .iter()
                .any(|l| l.source == StreamSource::Stdout && l.text == "out")
        );
        assert!(
            lines
                .iter()
                .any(|l| l.source == StreamSource::Stderr && l.text == "err")
        );
    }

    #[tokio::test]
    async fn test_final_line_without_newline_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle =
            ProcessRunner::start(sh("printf 'no newline'", dir.path(), None)).unwrap();
        let lines = collect_lines(&mut handle).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "no newline");
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ProcessCommand {
            program: "definitely-not-a-real-binary-4d1e".to_string(),
            args: vec![],
            cwd: dir.path().to_path_buf(),
            env: HashMap::new(),
            input: String::new(),
            timeout: None,
        };
        let err = ProcessRunner::start(cmd).unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = ProcessRunner::start(sh("exit 3", dir.path(), None)).unwrap();
        collect_lines(&mut handle).await;
        let status = handle.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_timeout_kills_hung_process() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let mut handle = ProcessRunner::start(sh(
            "sleep 30",
            dir.path(),
            Some(Duration::from_millis(200)),
        ))
        .unwrap();
        let err = loop {
            match handle.next_line().await {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("stream ended without timeout"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_terminate_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = ProcessRunner::start(sh("sleep 30", dir.path(), None)).unwrap();
        handle.terminate().await;
        // After termination the stream drains to completion promptly.
        let lines = collect_lines(&mut handle).await;
        assert!(lines.is_empty());
    }
}
