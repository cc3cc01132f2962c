//! Bounded-concurrency task intake — `conductor worker`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tracing::info;

use conductor::config::Config;
use conductor::executor::TaskExecutor;
use conductor::publisher::EventPublisher;
use conductor::session::SessionManager;
use conductor::task::TaskState;
use conductor::worker::{JsonLinesSource, Worker};

pub async fn cmd_worker(config: Config, tasks: Option<PathBuf>, json: bool) -> Result<()> {
    let sessions = Arc::new(SessionManager::new(config.session_base_dir.clone()));
    let publisher = Arc::new(EventPublisher::new());
    let max_concurrent = config.max_concurrent_tasks;
    let executor = Arc::new(TaskExecutor::new(config, sessions, publisher));
    let worker = Arc::new(Worker::new(executor, max_concurrent));

    let on_signal = worker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested; cancelling running tasks");
            on_signal.cancel_all();
        }
    });

    match tasks {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            worker.run(JsonLinesSource::new(file)).await;
        }
        None => {
            worker.run(JsonLinesSource::new(tokio::io::stdin())).await;
        }
    }

    let results = worker.results();
    let failed = results
        .iter()
        .filter(|r| r.status == TaskState::Failed)
        .count();

    if json {
        for result in &results {
            println!("{}", serde_json::to_string(result)?);
        }
    } else {
        let completed = results
            .iter()
            .filter(|r| r.status == TaskState::Completed)
            .count();
        let cancelled = results
            .iter()
            .filter(|r| r.status == TaskState::Cancelled)
            .count();
        println!(
            "{} {} completed, {} failed, {} cancelled",
            style("done:").bold(),
            completed,
            failed,
            cancelled
        );
    }

    if failed > 0 {
        anyhow::bail!("{} task(s) failed", failed);
    }
    Ok(())
}
