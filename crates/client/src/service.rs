//! The task-service seam.
//!
//! The poller and tracker only talk to the backend through
//! [`TaskService`]. [`HttpTaskService`](crate::api::HttpTaskService) is the
//! production implementation; tests substitute scripted fakes.

use aidash_core::error::CoreError;
use aidash_core::task::TaskKind;
use aidash_core::types::TaskId;
use aidash_core::wire::StatusUpdate;
use async_trait::async_trait;

use crate::api::TaskServiceError;

/// Parameters for submitting a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub kind: TaskKind,
    /// Job parameters forwarded verbatim as the request body.
    pub params: serde_json::Value,
}

impl SubmitRequest {
    pub fn new(kind: TaskKind, params: serde_json::Value) -> Self {
        Self { kind, params }
    }

    /// Job parameters must be a JSON object.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.params.is_object() {
            return Err(CoreError::Validation(format!(
                "{} job parameters must be a JSON object",
                self.kind
            )));
        }
        Ok(())
    }
}

/// Backend operations used by the task tracker.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Submit a job and return the server-issued task id.
    async fn create_task(&self, request: &SubmitRequest) -> Result<TaskId, TaskServiceError>;

    /// Query the current status of a task.
    async fn fetch_status(&self, task_id: &str) -> Result<StatusUpdate, TaskServiceError>;
}
