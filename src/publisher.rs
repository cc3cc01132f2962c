//! Per-task pub/sub fan-out for parsed agent events and state transitions.
//!
//! One broadcast channel per task id. Publishing is fire-and-forget: a slow
//! subscriber lags and drops messages, an absent subscriber costs nothing,
//! and neither can ever stall the task executor's streaming loop.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::events::AgentEvent;
use crate::task::TaskState;

const CHANNEL_CAPACITY: usize = 256;

/// What flows over a task's channel: parsed events plus lifecycle
/// transitions, in the order the executor produced them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskUpdate {
    Event { event: AgentEvent },
    State { state: TaskState },
}

/// Concurrent registry of task channels. The only state shared between task
/// executors.
pub struct EventPublisher {
    channels: RwLock<HashMap<String, broadcast::Sender<TaskUpdate>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a task's channel, creating it on demand. Subscribers
    /// receive every update published after this call, at most once each.
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskUpdate> {
        let mut channels = self.channels.write().expect("publisher registry poisoned");
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an update to all current subscribers of the task's channel.
    /// Never blocks; delivery is best-effort.
    pub fn publish(&self, task_id: &str, update: TaskUpdate) {
        let channels = self.channels.read().expect("publisher registry poisoned");
        if let Some(tx) = channels.get(task_id) {
            // Err means no live receivers; that is fine.
            let _ = tx.send(update);
        }
    }

    /// Drop a task's channel once the task is terminal. Existing subscribers
    /// drain whatever is still buffered, then observe the close.
    pub fn close(&self, task_id: &str) {
        let mut channels = self.channels.write().expect("publisher registry poisoned");
        channels.remove(task_id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels
            .read()
            .expect("publisher registry poisoned")
            .len()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
