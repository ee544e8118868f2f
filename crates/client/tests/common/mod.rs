#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aidash_client::api::TaskServiceError;
use aidash_client::poller::PollConfig;
use aidash_client::retry::RetryConfig;
use aidash_client::service::{SubmitRequest, TaskService};
use aidash_core::task::{TaskKind, TaskStatus};
use aidash_core::types::TaskId;
use aidash_core::wire::StatusUpdate;
use aidash_events::TaskRegistry;
use async_trait::async_trait;

/// One scripted answer to a status query.
#[derive(Debug, Clone)]
pub enum Step {
    /// Answer immediately.
    Status(StatusUpdate),
    /// Answer after a delay (in virtual time under `start_paused`).
    Delayed(Duration, StatusUpdate),
    /// Fail with a 503.
    Transient,
    /// Fail with a non-retryable status code.
    Reject(u16),
}

#[derive(Default)]
struct Script {
    steps: HashMap<TaskId, VecDeque<Step>>,
    last: HashMap<TaskId, StatusUpdate>,
    queries: HashMap<TaskId, usize>,
    created: VecDeque<Result<TaskId, String>>,
    submissions: Vec<SubmitRequest>,
}

/// In-memory [`TaskService`] replaying scripted answers per task id.
///
/// Once a task's script runs out, the last successful answer is repeated;
/// a task with no successful answer yet keeps failing transiently.
#[derive(Clone, Default)]
pub struct ScriptedService {
    script: Arc<Mutex<Script>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task_id: &str, step: Step) -> &Self {
        self.script
            .lock()
            .unwrap()
            .steps
            .entry(task_id.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn push_status(&self, task_id: &str, update: StatusUpdate) -> &Self {
        self.push(task_id, Step::Status(update))
    }

    /// Queue the answer to the next `create_task` call.
    pub fn push_created(&self, result: Result<&str, &str>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .created
            .push_back(result.map(str::to_string).map_err(str::to_string));
        self
    }

    pub fn queries(&self, task_id: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .queries
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.script.lock().unwrap().submissions.clone()
    }

    pub fn into_service(self) -> Arc<dyn TaskService> {
        Arc::new(self)
    }

    fn next_step(&self, task_id: &str) -> Step {
        let mut script = self.script.lock().unwrap();
        *script.queries.entry(task_id.to_string()).or_default() += 1;

        let step = script.steps.get_mut(task_id).and_then(VecDeque::pop_front);
        match step {
            Some(step) => {
                if let Step::Status(update) | Step::Delayed(_, update) = &step {
                    script.last.insert(task_id.to_string(), update.clone());
                }
                step
            }
            None => match script.last.get(task_id) {
                Some(update) => Step::Status(update.clone()),
                None => Step::Transient,
            },
        }
    }
}

#[async_trait]
impl TaskService for ScriptedService {
    async fn create_task(&self, request: &SubmitRequest) -> Result<TaskId, TaskServiceError> {
        let mut script = self.script.lock().unwrap();
        script.submissions.push(request.clone());
        let index = script.submissions.len();
        match script.created.pop_front() {
            Some(Ok(id)) => Ok(id),
            Some(Err(message)) => Err(TaskServiceError::Rejected(message)),
            None => Ok(format!("task-{index}")),
        }
    }

    async fn fetch_status(&self, task_id: &str) -> Result<StatusUpdate, TaskServiceError> {
        match self.next_step(task_id) {
            Step::Status(update) => Ok(update),
            Step::Delayed(delay, update) => {
                tokio::time::sleep(delay).await;
                Ok(update)
            }
            Step::Transient => Err(transient_error()),
            Step::Reject(status) => Err(TaskServiceError::ApiError {
                status,
                body: "rejected".to_string(),
            }),
        }
    }
}

/// A 503 from the task service, standing in for a network failure.
pub fn transient_error() -> TaskServiceError {
    TaskServiceError::ApiError {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

pub fn registry() -> Arc<TaskRegistry> {
    Arc::new(TaskRegistry::new())
}

/// Fast poll settings for tests running on paused time.
pub fn test_poll_config() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(100),
        retry: RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_retries: 3,
        },
        seed_kind: TaskKind::Analysis,
    }
}

pub fn status(status: TaskStatus, progress: u8) -> StatusUpdate {
    StatusUpdate::new(status).with_progress(progress)
}
