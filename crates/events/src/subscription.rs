//! Per-task subscriptions over the registry event stream.

use std::sync::Arc;

use aidash_core::task::Task;
use aidash_core::types::TaskId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::bus::TaskEvent;
use crate::registry::TaskRegistry;

/// A change to the watched task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    /// The task was created or updated; carries the new snapshot.
    Updated(Task),
    /// The task was removed (or the registry reset).
    Removed,
}

/// Follows one task in a [`TaskRegistry`].
///
/// Created by [`TaskRegistry::watch`]. The task does not need to exist
/// when the subscription is made; its creation is reported as a change.
/// The underlying channel is subscribed at construction, so reading
/// [`current`](Self::current) and then awaiting
/// [`changed`](Self::changed) cannot miss an update.
pub struct TaskSubscription {
    registry: Arc<TaskRegistry>,
    task_id: TaskId,
    receiver: broadcast::Receiver<TaskEvent>,
    /// Whether the task has been observed in the registry.
    seen: bool,
}

impl TaskSubscription {
    pub(crate) fn new(
        registry: Arc<TaskRegistry>,
        task_id: TaskId,
        receiver: broadcast::Receiver<TaskEvent>,
    ) -> Self {
        Self {
            registry,
            task_id,
            receiver,
            seen: false,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Current snapshot of the watched task.
    pub fn current(&self) -> Option<Task> {
        self.registry.get(&self.task_id)
    }

    /// Wait for the next change to the watched task.
    ///
    /// Events for other tasks are skipped. If this subscriber lagged
    /// behind the channel, the current snapshot is reported instead of the
    /// missed events; a lag before the task first appears is absorbed.
    ///
    /// The subscription keeps the registry, and with it the sender, alive,
    /// so this only returns `None` if the channel is closed some other way.
    pub async fn changed(&mut self) -> Option<TaskChange> {
        loop {
            match self.receiver.recv().await {
                Ok(TaskEvent::Reset) => return Some(TaskChange::Removed),
                Ok(event) if event.task_id() == Some(self.task_id.as_str()) => {
                    return Some(match event {
                        TaskEvent::Removed { .. } => TaskChange::Removed,
                        TaskEvent::Created { task } | TaskEvent::Updated { task, .. } => {
                            self.seen = true;
                            TaskChange::Updated(task)
                        }
                        TaskEvent::Reset => TaskChange::Removed,
                    });
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        task_id = %self.task_id,
                        skipped,
                        "Task subscription lagged, resyncing from snapshot",
                    );
                    match self.current() {
                        Some(task) => {
                            self.seen = true;
                            return Some(TaskChange::Updated(task));
                        }
                        None if self.seen => return Some(TaskChange::Removed),
                        // Not created yet; keep waiting for it.
                        None => continue,
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Resolve with the first snapshot matching `predicate`, checking the
    /// current state first. Returns `None` if the task is removed first.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<Task>
    where
        F: Fn(&Task) -> bool,
    {
        if let Some(task) = self.current() {
            self.seen = true;
            if predicate(&task) {
                return Some(task);
            }
        }

        loop {
            match self.changed().await? {
                TaskChange::Updated(task) if predicate(&task) => return Some(task),
                TaskChange::Updated(_) => continue,
                TaskChange::Removed => return None,
            }
        }
    }

    /// Resolve once the task reaches `completed` or `failed`.
    pub async fn wait_terminal(&mut self) -> Option<Task> {
        self.wait_for(Task::is_terminal).await
    }
}
