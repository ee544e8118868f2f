//! Per-task status poller.
//!
//! A [`Poller`] follows exactly one task id: it queries the task service,
//! reconciles each answer into the [`TaskRegistry`], and stops once the
//! task is terminal, removed, or the poller is cancelled. The registry's
//! poller lease guarantees at most one poller per id; the lease is held
//! for the lifetime of the [`Poller`] value and released when it drops.
//!
//! ```text
//!   start ─► already terminal? ─yes─► Finished (zero queries)
//!              │ no
//!              ▼
//!           query ─ok─► patch registry ─► terminal? ─yes─► Finished
//!              │                             │ no
//!              │                             ▼
//!              │                        sleep(interval) ─► query ...
//!              │
//!              ├─transient─► backoff ─► query ...   (budget spent ─► RetriesExhausted)
//!              └─other────► mark failed ─► Escalated
//! ```

use std::sync::Arc;
use std::time::Duration;

use aidash_core::task::{Task, TaskKind, TaskPatch};
use aidash_core::types::TaskId;
use aidash_core::wire::StatusUpdate;
use aidash_events::{PollerLease, RegistryError, TaskRegistry};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::api::TaskServiceError;
use crate::retry::{sleep_or_cancel, Backoff, RetryConfig};
use crate::service::TaskService;

/// Failure message stored on a task whose poller gave up on the service.
pub const CONNECTION_LOST_MESSAGE: &str = "Lost connection to the task service";

/// Poller tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Delay between a successful answer and the next query.
    pub interval: Duration,
    /// Backoff for transient failures.
    pub retry: RetryConfig,
    /// Kind given to a task first seen through a status answer that does
    /// not carry its type.
    pub seed_kind: TaskKind,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            retry: RetryConfig::default(),
            seed_kind: TaskKind::Analysis,
        }
    }
}

/// Why a poller stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The task reached `completed` or `failed`.
    Finished(Task),
    /// Too many consecutive transient failures; the task was marked failed.
    RetriesExhausted(Task),
    /// The service refused the query outright; the task was marked failed.
    Escalated(Task),
    /// The poller was cancelled by its owner.
    Cancelled,
    /// The task disappeared from the registry.
    Removed,
}

impl PollOutcome {
    /// The terminal snapshot, if the poller ended on one.
    pub fn task(&self) -> Option<&Task> {
        match self {
            PollOutcome::Finished(task)
            | PollOutcome::RetriesExhausted(task)
            | PollOutcome::Escalated(task) => Some(task),
            PollOutcome::Cancelled | PollOutcome::Removed => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Polls one task until it is terminal. See the module docs.
pub struct Poller {
    registry: Arc<TaskRegistry>,
    service: Arc<dyn TaskService>,
    config: PollConfig,
    cancel: CancellationToken,
    lease: PollerLease,
    /// Whether the task has been present in the registry since start.
    seen: bool,
}

impl Poller {
    /// Claim the poller lease for `task_id`.
    ///
    /// Returns `None` if another poller already follows this id.
    pub fn new(
        registry: Arc<TaskRegistry>,
        service: Arc<dyn TaskService>,
        task_id: &str,
        config: PollConfig,
        cancel: CancellationToken,
    ) -> Option<Self> {
        let lease = registry.claim_poller(task_id)?;
        Some(Self {
            registry,
            service,
            config,
            cancel,
            lease,
            seen: false,
        })
    }

    pub fn task_id(&self) -> &str {
        self.lease.task_id()
    }

    /// Run the poll loop on a new tokio task.
    pub fn spawn(self) -> PollerHandle {
        let task_id: TaskId = self.task_id().to_string();
        let cancel = self.cancel.clone();
        let guard = cancel.clone().drop_guard();
        let join = tokio::spawn(self.run());

        PollerHandle {
            task_id,
            cancel,
            _guard: guard,
            join,
        }
    }

    /// Poll until the task is terminal, removed, or the poller cancelled.
    ///
    /// The first query is issued immediately.
    pub async fn run(mut self) -> PollOutcome {
        let mut backoff = Backoff::new(self.config.retry.clone());
        tracing::info!(task_id = %self.task_id(), "Poller started");

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break PollOutcome::Cancelled;
            }

            match self.registry.get(self.task_id()) {
                Some(task) if task.is_terminal() => break PollOutcome::Finished(task),
                Some(_) => self.seen = true,
                None if self.seen => break PollOutcome::Removed,
                None => {}
            }

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break PollOutcome::Cancelled,
                response = self.service.fetch_status(self.task_id()) => response,
            };

            match response.map_err(TaskServiceError::into_poll_error) {
                Ok(update) => {
                    // An answer that resolved together with the cancel is dropped.
                    if self.cancel.is_cancelled() {
                        break PollOutcome::Cancelled;
                    }
                    backoff.reset();
                    match self.reconcile(&update) {
                        Some(task) if task.is_terminal() => break PollOutcome::Finished(task),
                        Some(_) => {}
                        None => break PollOutcome::Removed,
                    }
                    if !sleep_or_cancel(self.config.interval, &self.cancel).await {
                        break PollOutcome::Cancelled;
                    }
                }
                Err(e) if e.is_transient() => match backoff.next() {
                    Some(delay) => {
                        tracing::warn!(
                            task_id = %self.task_id(),
                            attempt = backoff.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Status query failed, retrying",
                        );
                        if !sleep_or_cancel(delay, &self.cancel).await {
                            break PollOutcome::Cancelled;
                        }
                    }
                    None => {
                        tracing::error!(
                            task_id = %self.task_id(),
                            attempts = backoff.attempts(),
                            error = %e,
                            "Giving up on status queries",
                        );
                        break match self.fail(CONNECTION_LOST_MESSAGE) {
                            Some(task) => PollOutcome::RetriesExhausted(task),
                            None => PollOutcome::Removed,
                        };
                    }
                },
                Err(e) => {
                    tracing::error!(
                        task_id = %self.task_id(),
                        error = %e,
                        "Status query rejected",
                    );
                    break match self.fail(e.message()) {
                        Some(task) => PollOutcome::Escalated(task),
                        None => PollOutcome::Removed,
                    };
                }
            }
        };

        tracing::info!(task_id = %self.task_id(), outcome = outcome_name(&outcome), "Poller stopped");
        outcome
    }

    // ---- private helpers ----

    /// Apply one status answer. Returns the task as it now stands, or
    /// `None` if it was removed while being polled.
    fn reconcile(&mut self, update: &StatusUpdate) -> Option<Task> {
        if !self.ensure_entity(update.kind) {
            return None;
        }

        match self.registry.patch(self.task_id(), &update.to_patch()) {
            Ok(outcome) => Some(outcome.into_task()),
            Err(RegistryError::NotFound(_)) => None,
            Err(e) => {
                // Regressions and stale answers are dropped; keep polling.
                tracing::debug!(task_id = %self.task_id(), error = %e, "Discarded status answer");
                self.registry.get(self.task_id())
            }
        }
    }

    /// Mark the task failed, seeding it first if it was never seen.
    fn fail(&mut self, message: &str) -> Option<Task> {
        if !self.ensure_entity(None) {
            return None;
        }

        match self.registry.patch(self.task_id(), &TaskPatch::failed(message)) {
            Ok(outcome) => Some(outcome.into_task()),
            Err(RegistryError::NotFound(_)) => None,
            Err(e) => {
                tracing::debug!(task_id = %self.task_id(), error = %e, "Task already settled");
                self.registry.get(self.task_id())
            }
        }
    }

    /// Make sure the task exists, creating it on a cold attach.
    ///
    /// Returns `false` if the task existed earlier and has since been
    /// removed; a removed task is never recreated.
    fn ensure_entity(&mut self, kind: Option<TaskKind>) -> bool {
        if self.registry.contains(self.task_id()) {
            self.seen = true;
            return true;
        }
        if self.seen {
            return false;
        }

        let kind = kind.unwrap_or(self.config.seed_kind);
        match self.registry.create(Task::new(self.task_id(), kind)) {
            Ok(_) => tracing::info!(task_id = %self.task_id(), kind = %kind, "Seeded task from status answer"),
            Err(e) => tracing::debug!(task_id = %self.task_id(), error = %e, "Task appeared concurrently"),
        }
        self.seen = true;
        true
    }
}

fn outcome_name(outcome: &PollOutcome) -> &'static str {
    match outcome {
        PollOutcome::Finished(_) => "finished",
        PollOutcome::RetriesExhausted(_) => "retries_exhausted",
        PollOutcome::Escalated(_) => "escalated",
        PollOutcome::Cancelled => "cancelled",
        PollOutcome::Removed => "removed",
    }
}

// ---------------------------------------------------------------------------
// PollerHandle
// ---------------------------------------------------------------------------

/// Owner's handle to a spawned [`Poller`]. Dropping it cancels the poller.
pub struct PollerHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    _guard: DropGuard,
    join: JoinHandle<PollOutcome>,
}

impl PollerHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Stop the poller. Any answer still in flight is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the poller to stop and report why.
    pub async fn join(self) -> PollOutcome {
        let PollerHandle {
            task_id,
            join,
            _guard,
            ..
        } = self;

        match join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Poller task panicked or was aborted");
                PollOutcome::Cancelled
            }
        }
    }
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle")
            .field("task_id", &self.task_id)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}
