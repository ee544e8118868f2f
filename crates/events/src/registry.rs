//! The task registry: authoritative, observable map of `id -> Task`.
//!
//! All task mutation goes through [`TaskRegistry::create`],
//! [`TaskRegistry::patch`], [`TaskRegistry::remove`] and
//! [`TaskRegistry::reset`]. Each publishes its [`TaskEvent`] while the
//! registry lock is still held, so subscribers observe events in exactly
//! the order mutations happened and never see interleaved snapshots.
//!
//! The registry also owns the per-identifier "active poller" flag handed
//! out as a [`PollerLease`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aidash_core::task::{PatchRejection, Task, TaskPatch};
use aidash_core::types::TaskId;
use tokio::sync::broadcast;

use crate::bus::TaskEvent;
use crate::subscription::TaskSubscription;

/// Default buffer capacity for the event channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Errors returned by registry mutations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Task {0} already exists")]
    DuplicateId(TaskId),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Patch rejected for task {id}: {reason}")]
    Rejected {
        id: TaskId,
        #[source]
        reason: PatchRejection,
    },
}

/// Result of an accepted [`TaskRegistry::patch`].
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    /// The task changed; subscribers were notified.
    Applied(Task),
    /// The patch was valid but changed nothing; no event was published.
    Unchanged(Task),
}

impl PatchOutcome {
    /// The task as it stands after the patch.
    pub fn task(&self) -> &Task {
        match self {
            PatchOutcome::Applied(task) | PatchOutcome::Unchanged(task) => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            PatchOutcome::Applied(task) | PatchOutcome::Unchanged(task) => task,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<TaskId, Task>,
    active_pollers: HashSet<TaskId>,
}

/// Process-wide task store.
///
/// Created once at application start and shared via `Arc<TaskRegistry>`.
/// Reads return cloned snapshots; nothing outside the registry can
/// mutate a stored task.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a registry whose event channel buffers `capacity` events.
    ///
    /// Subscribers that fall further behind observe a lag and resync from
    /// the current snapshot (see [`TaskSubscription`]).
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(RegistryState::default()),
            events,
        }
    }

    // ---- reads ----

    /// Snapshot of one task, or `None` if the id is unknown.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Snapshot of every task, oldest first.
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    // ---- mutations ----

    /// Insert a new task. Fails with [`RegistryError::DuplicateId`] if the
    /// id is already present.
    pub fn create(&self, task: Task) -> Result<Task, RegistryError> {
        let mut state = self.lock();
        if state.tasks.contains_key(&task.id) {
            tracing::warn!(task_id = %task.id, "Refusing to create duplicate task");
            return Err(RegistryError::DuplicateId(task.id));
        }

        state.tasks.insert(task.id.clone(), task.clone());
        tracing::debug!(task_id = %task.id, kind = %task.kind, "Task created");
        self.publish(TaskEvent::Created { task: task.clone() });
        Ok(task)
    }

    /// Merge `patch` into the task with the given id.
    ///
    /// A patch that would regress the status, overwrite a terminal
    /// outcome, or carry a stale server stamp is rejected and logged; the
    /// stored task is left untouched.
    pub fn patch(&self, id: &str, patch: &TaskPatch) -> Result<PatchOutcome, RegistryError> {
        let mut state = self.lock();
        let current = state
            .tasks
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let merged = match current.merge(patch, chrono::Utc::now()) {
            Ok(merged) => merged,
            Err(reason) => {
                tracing::warn!(
                    task_id = %id,
                    status = %current.status,
                    reason = %reason,
                    "Rejected task patch",
                );
                return Err(RegistryError::Rejected {
                    id: id.to_string(),
                    reason,
                });
            }
        };

        let Some(next) = merged else {
            return Ok(PatchOutcome::Unchanged(current.clone()));
        };

        let previous_status = current.status;
        state.tasks.insert(next.id.clone(), next.clone());
        tracing::debug!(
            task_id = %id,
            from = %previous_status,
            to = %next.status,
            progress = next.progress,
            "Task updated",
        );
        self.publish(TaskEvent::Updated {
            previous_status,
            task: next.clone(),
        });
        Ok(PatchOutcome::Applied(next))
    }

    /// Delete a task, returning it if it existed.
    pub fn remove(&self, id: &str) -> Option<Task> {
        let mut state = self.lock();
        let task = state.tasks.remove(id)?;
        tracing::debug!(task_id = %id, "Task removed");
        self.publish(TaskEvent::Removed { task: task.clone() });
        Some(task)
    }

    /// Drop every task.
    ///
    /// Poller leases are owned by their running pollers and are left in
    /// place; those pollers observe the removal and stop on their own.
    pub fn reset(&self) {
        let mut state = self.lock();
        let count = state.tasks.len();
        state.tasks.clear();
        tracing::info!(count, "Task registry reset");
        self.publish(TaskEvent::Reset);
    }

    // ---- subscriptions ----

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Follow a single task. The id does not have to exist yet.
    pub fn watch(self: &Arc<Self>, id: impl Into<TaskId>) -> TaskSubscription {
        TaskSubscription::new(Arc::clone(self), id.into(), self.events.subscribe())
    }

    // ---- poller flags ----

    /// Mark `id` as having an active poller.
    ///
    /// Returns `None` if another poller already holds the flag. The flag
    /// is released when the returned lease is dropped.
    pub fn claim_poller(self: &Arc<Self>, id: &str) -> Option<PollerLease> {
        let mut state = self.lock();
        if !state.active_pollers.insert(id.to_string()) {
            tracing::debug!(task_id = %id, "Poller already active");
            return None;
        }
        Some(PollerLease {
            registry: Arc::clone(self),
            task_id: id.to_string(),
        })
    }

    pub fn has_active_poller(&self, id: &str) -> bool {
        self.lock().active_pollers.contains(id)
    }

    pub fn active_poller_count(&self) -> usize {
        self.lock().active_pollers.len()
    }

    // ---- private helpers ----

    fn release_poller(&self, id: &str) {
        self.lock().active_pollers.remove(id);
    }

    /// Send an event to all current subscribers. Having none is not an
    /// error.
    fn publish(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }

    /// Poisoning is ignored: every mutation writes a complete task.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The "active poller" flag for one task id. Released on drop.
pub struct PollerLease {
    registry: Arc<TaskRegistry>,
    task_id: TaskId,
}

impl PollerLease {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for PollerLease {
    fn drop(&mut self) {
        self.registry.release_poller(&self.task_id);
        tracing::debug!(task_id = %self.task_id, "Poller lease released");
    }
}

impl std::fmt::Debug for PollerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerLease")
            .field("task_id", &self.task_id)
            .finish()
    }
}
