//! One-shot task execution — `conductor run`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use conductor::config::Config;
use conductor::events::AgentEvent;
use conductor::executor::TaskExecutor;
use conductor::publisher::{EventPublisher, TaskUpdate};
use conductor::session::SessionManager;
use conductor::task::{TaskDescriptor, TaskState};

/// Assemble a descriptor from CLI flags.
pub fn build_descriptor(
    task_id: Option<String>,
    prompt: Option<String>,
    prompt_file: Option<PathBuf>,
    mode: &str,
    repository_url: Option<String>,
    max_turns: Option<u32>,
) -> Result<TaskDescriptor> {
    let prompt = match (prompt, prompt_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide a prompt with --prompt or --prompt-file"),
    };
    let mode = mode
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("Unknown mode (expected write, review, ask, or analyze)")?;

    Ok(TaskDescriptor {
        task_id: task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        prompt,
        mode,
        repository_url,
        max_turns,
    })
}

pub async fn cmd_run(config: Config, descriptor: TaskDescriptor, json: bool) -> Result<()> {
    let sessions = Arc::new(SessionManager::new(config.session_base_dir.clone()));
    let publisher = Arc::new(EventPublisher::new());
    let executor = TaskExecutor::new(config, sessions, publisher.clone());

    // Subscribe before the executor starts so no update is missed.
    let mut rx = publisher.subscribe(&descriptor.task_id);
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => render_update(&update, json),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = executor.execute(descriptor, cancel).await;
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!(
            "{} {} ({} events)",
            style("task").bold(),
            style(result.status.as_str()).bold(),
            result.events.len()
        );
        for artifact in &result.artifacts {
            println!("  {} {}", style("changed").magenta(), artifact);
        }
    }

    match result.status {
        TaskState::Completed => Ok(()),
        status => {
            let cause = result.error.unwrap_or_default();
            anyhow::bail!("task {} {}: {}", result.task_id, status, cause)
        }
    }
}

fn render_update(update: &TaskUpdate, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(update) {
            println!("{}", line);
        }
        return;
    }
    match update {
        TaskUpdate::State { state } => {
            println!("{}", style(format!("── {}", state)).dim());
        }
        TaskUpdate::Event { event } => render_event(event),
    }
}

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::ToolUse { name, .. } => {
            println!("{} {}", style("tool").cyan(), name);
        }
        AgentEvent::Message { role, text } => {
            println!("{} {}", style(role).green(), text);
        }
        AgentEvent::FileOperation { op, path } => {
            println!("{} {} {}", style("file").magenta(), op.as_str(), path);
        }
        AgentEvent::CommandExecution { command } => {
            println!("{} {}", style("exec").yellow(), command);
        }
        AgentEvent::Status { text } => {
            println!("{}", style(text).dim());
        }
        AgentEvent::Error { text } => {
            eprintln!("{} {}", style("error").red(), text);
        }
        AgentEvent::Completion { success, summary } => {
            println!("{} success={} {}", style("done").bold(), success, summary);
        }
        AgentEvent::RawOutput { text } => {
            println!("{}", style(text).dim());
        }
    }
}
