//! Runs many tasks with bounded concurrency.
//!
//! Descriptors come from a `TaskSource` (the queue transport itself is an
//! external collaborator; `JsonLinesSource` is the minimal stand-in reading
//! line-delimited JSON). Each task runs in its own spawned executor with its
//! own cancellation token; terminal results are retained for polling by
//! task id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::executor::TaskExecutor;
use crate::task::{TaskDescriptor, TaskResult};

/// Where task descriptors come from. Implemented by the external queue
/// integration; tests and the CLI use `JsonLinesSource`.
#[async_trait]
pub trait TaskSource: Send {
    /// Next descriptor, or `None` when the source is exhausted.
    async fn next_task(&mut self) -> Option<TaskDescriptor>;
}

/// Reads one JSON task descriptor per line. Malformed lines are logged and
/// skipped — a bad message is rejected before it ever reaches `Running`.
pub struct JsonLinesSource<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: tokio::io::AsyncRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }
}

#[async_trait]
impl<R: tokio::io::AsyncRead + Unpin + Send> TaskSource for JsonLinesSource<R> {
    async fn next_task(&mut self) -> Option<TaskDescriptor> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<TaskDescriptor>(&line) {
                        Ok(descriptor) => return Some(descriptor),
                        Err(e) => {
                            warn!(error = %e, "skipping malformed task descriptor");
                        }
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    error!(error = %e, "task source read failed");
                    return None;
                }
            }
        }
    }
}

pub struct Worker {
    executor: Arc<TaskExecutor>,
    max_concurrent: usize,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
    results: Arc<RwLock<HashMap<String, TaskResult>>>,
}

impl Worker {
    pub fn new(executor: Arc<TaskExecutor>, max_concurrent: usize) -> Self {
        Self {
            executor,
            max_concurrent: max_concurrent.max(1),
            running: Arc::new(Mutex::new(HashMap::new())),
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Drain the source, running up to `max_concurrent` tasks at once.
    /// Returns once every accepted task has reached a terminal state.
    pub async fn run(&self, mut source: impl TaskSource) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        while let Some(descriptor) = source.next_task().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let task_id = descriptor.task_id.clone();
            let token = CancellationToken::new();
            self.running
                .lock()
                .expect("worker registry poisoned")
                .insert(task_id.clone(), token.clone());

            let executor = self.executor.clone();
            let running = self.running.clone();
            let results = self.results.clone();
            tasks.spawn(async move {
                let result = executor.execute(descriptor, token).await;
                drop(permit);
                running
                    .lock()
                    .expect("worker registry poisoned")
                    .remove(&task_id);
                results
                    .write()
                    .expect("worker results poisoned")
                    .insert(task_id, result);
            });

            // Reap already-finished tasks so the set stays small.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "task executor panicked");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "task executor panicked");
            }
        }
        let finished = self.results.read().expect("worker results poisoned").len();
        info!(results = finished, "worker drained");
    }

    /// Request cancellation of a running task. Returns false if the task is
    /// not currently running.
    pub fn cancel(&self, task_id: &str) -> bool {
        let running = self.running.lock().expect("worker registry poisoned");
        match running.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running task (shutdown path).
    pub fn cancel_all(&self) {
        let running = self.running.lock().expect("worker registry poisoned");
        for token in running.values() {
            token.cancel();
        }
    }

    /// Terminal result for a task, if it has finished.
    pub fn result(&self, task_id: &str) -> Option<TaskResult> {
        self.results
            .read()
            .expect("worker results poisoned")
            .get(task_id)
            .cloned()
    }

    /// All terminal results accumulated so far.
    pub fn results(&self) -> Vec<TaskResult> {
        self.results
            .read()
            .expect("worker results poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().expect("worker registry poisoned").len()
    }
}
