//! Change events published by the [`TaskRegistry`](crate::TaskRegistry).
//!
//! Every event carries the full post-change snapshot so a subscriber
//! never has to read back from the registry to render a consistent view.

use aidash_core::task::{Task, TaskStatus};
use serde::Serialize;

/// A change to the task registry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A task was inserted.
    Created { task: Task },

    /// A patch was accepted and changed the task.
    Updated {
        previous_status: TaskStatus,
        task: Task,
    },

    /// A task was deleted.
    Removed { task: Task },

    /// The registry was cleared.
    Reset,
}

impl TaskEvent {
    /// Identifier of the task this event concerns, if any.
    pub fn task_id(&self) -> Option<&str> {
        self.task().map(|t| t.id.as_str())
    }

    /// Snapshot carried by the event.
    pub fn task(&self) -> Option<&Task> {
        match self {
            TaskEvent::Created { task }
            | TaskEvent::Updated { task, .. }
            | TaskEvent::Removed { task } => Some(task),
            TaskEvent::Reset => None,
        }
    }

    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Created { .. } => "task.created",
            TaskEvent::Updated { .. } => "task.updated",
            TaskEvent::Removed { .. } => "task.removed",
            TaskEvent::Reset => "registry.reset",
        }
    }
}
