//! Producer and consumer entry points.
//!
//! [`TaskTracker`] is what pages use: `submit` starts a new job and
//! `attach` follows an existing one. Both return a [`TaskWatch`] bound to
//! the task's id in the shared [`TaskRegistry`].

use std::sync::Arc;

use aidash_core::error::{CoreError, TaskError};
use aidash_core::task::{Task, TaskKind, TaskPatch, TaskStatus};
use aidash_core::types::TaskId;
use aidash_events::{RegistryError, TaskChange, TaskRegistry, TaskSubscription};
use tokio_util::sync::CancellationToken;

use crate::poller::{PollConfig, PollOutcome, Poller, PollerHandle};
use crate::service::{SubmitRequest, TaskService};

/// Prefix of the id given to a task before the service has issued one.
pub const PLACEHOLDER_PREFIX: &str = "local-";

/// Errors returned by [`TaskTracker`] and [`TaskWatch`].
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Submits and follows tasks against one task service.
///
/// Every poller started here runs on a child of the tracker's
/// cancellation token, so [`shutdown`](Self::shutdown) stops them all.
pub struct TaskTracker {
    registry: Arc<TaskRegistry>,
    service: Arc<dyn TaskService>,
    config: PollConfig,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl TaskTracker {
    pub fn new(
        registry: Arc<TaskRegistry>,
        service: Arc<dyn TaskService>,
        config: PollConfig,
    ) -> Self {
        Self {
            registry,
            service,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Submit a new job and start polling it.
    ///
    /// A pending placeholder is registered before the service is called so
    /// views can render the job at once. On success the placeholder is
    /// replaced by a task under the server-issued id. On failure the
    /// placeholder is left behind marked failed and no poller is started;
    /// [`clear_failed_placeholders`](Self::clear_failed_placeholders)
    /// removes such leftovers.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskWatch, TrackerError> {
        request.validate()?;

        let placeholder_id = format!("{PLACEHOLDER_PREFIX}{}", uuid::Uuid::new_v4());
        self.registry
            .create(Task::new(placeholder_id.clone(), request.kind))?;

        let task_id = match self.service.create_task(&request).await {
            Ok(id) => id,
            Err(e) => {
                let err = e.into_creation_error();
                tracing::error!(
                    placeholder_id = %placeholder_id,
                    kind = %request.kind,
                    error = %err,
                    "Task submission failed",
                );
                let _ = self
                    .registry
                    .patch(&placeholder_id, &TaskPatch::failed(err.message()));
                return Err(err.into());
            }
        };

        self.registry.remove(&placeholder_id);
        let task = match self.registry.create(Task::new(task_id.clone(), request.kind)) {
            Ok(task) => task,
            // Already followed (e.g. attached by another view); keep it.
            Err(RegistryError::DuplicateId(_)) => self
                .registry
                .get(&task_id)
                .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?,
            Err(e) => return Err(e.into()),
        };

        tracing::info!(task_id = %task.id, kind = %task.kind, "Tracking submitted task");
        Ok(self.watch(task_id, self.config.clone()))
    }

    /// Follow an existing task by id.
    ///
    /// Does not create the task; if the registry has never seen it, the
    /// poller seeds it from the first status answer, using the answer's
    /// type, else `kind_hint`, else the configured default. If another
    /// poller already follows the id the returned watch only observes.
    pub fn attach(&self, task_id: impl Into<TaskId>, kind_hint: Option<TaskKind>) -> TaskWatch {
        let mut config = self.config.clone();
        if let Some(kind) = kind_hint {
            config.seed_kind = kind;
        }
        self.watch(task_id.into(), config)
    }

    /// Remove the placeholders of failed submissions from the registry.
    ///
    /// Returns how many were removed. Server-issued tasks are never touched.
    pub fn clear_failed_placeholders(&self) -> usize {
        let stale: Vec<TaskId> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|task| {
                task.id.starts_with(PLACEHOLDER_PREFIX) && task.status == TaskStatus::Failed
            })
            .map(|task| task.id)
            .collect();

        let removed = stale
            .iter()
            .filter(|id| self.registry.remove(id).is_some())
            .count();
        if removed > 0 {
            tracing::info!(removed, "Cleared failed submission placeholders");
        }
        removed
    }

    /// Cancel every poller started by this tracker.
    pub fn shutdown(&self) {
        tracing::info!(active_pollers = self.registry.active_poller_count(), "Shutting down task tracker");
        self.cancel.cancel();
    }

    // ---- private helpers ----

    fn watch(&self, task_id: TaskId, config: PollConfig) -> TaskWatch {
        // Subscribe before the poller starts so no update can be missed.
        let subscription = self.registry.watch(task_id.clone());
        let poller = Poller::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.service),
            &task_id,
            config,
            self.cancel.child_token(),
        )
        .map(Poller::spawn);

        if poller.is_none() {
            tracing::debug!(task_id = %task_id, "Poller already active, observing only");
        }

        TaskWatch {
            subscription,
            poller,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskWatch
// ---------------------------------------------------------------------------

/// A view's handle on one task.
///
/// Dropping the watch cancels the poller it owns, if any.
pub struct TaskWatch {
    subscription: TaskSubscription,
    poller: Option<PollerHandle>,
}

impl TaskWatch {
    pub fn task_id(&self) -> &str {
        self.subscription.task_id()
    }

    /// Current snapshot, `None` until a cold-attached task is seeded.
    pub fn current(&self) -> Option<Task> {
        self.subscription.current()
    }

    /// Wait for the next change to the task.
    pub async fn changed(&mut self) -> Option<TaskChange> {
        self.subscription.changed().await
    }

    /// Resolve with the terminal snapshot. `None` if the task is removed
    /// first.
    pub async fn wait_terminal(&mut self) -> Option<Task> {
        self.subscription.wait_terminal().await
    }

    /// Resolve with the result payload of a completed task.
    ///
    /// A failed task yields [`TaskError::TaskFailed`] carrying the stored
    /// message.
    pub async fn wait_result(&mut self) -> Result<Option<serde_json::Value>, TrackerError> {
        let task = self
            .wait_terminal()
            .await
            .ok_or_else(|| RegistryError::NotFound(self.task_id().to_string()))?;

        match task.status {
            TaskStatus::Completed => Ok(task.result),
            _ => Err(TaskError::TaskFailed(
                task.error
                    .unwrap_or_else(|| aidash_core::task::DEFAULT_FAILURE_MESSAGE.to_string()),
            )
            .into()),
        }
    }

    /// Whether this watch started (and therefore owns) the task's poller.
    pub fn owns_poller(&self) -> bool {
        self.poller.is_some()
    }

    /// Stop the owned poller, if any. The task keeps its last state.
    pub fn cancel(&self) {
        if let Some(poller) = &self.poller {
            poller.cancel();
        }
    }

    /// Wait for the owned poller to stop. `None` for an observing watch.
    pub async fn finish(mut self) -> Option<PollOutcome> {
        match self.poller.take() {
            Some(poller) => Some(poller.join().await),
            None => None,
        }
    }
}

impl std::fmt::Debug for TaskWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWatch")
            .field("task_id", &self.task_id())
            .field("poller", &self.poller)
            .finish()
    }
}
