//! REST client for the backend task service.
//!
//! Wraps the task-service HTTP API (job submission, status queries)
//! using [`reqwest`]. Response bodies are decoded through
//! [`aidash_core::wire`], so callers only ever see well-formed values.

use std::collections::HashMap;
use std::time::Duration;

use aidash_core::error::TaskError;
use aidash_core::task::TaskKind;
use aidash_core::types::TaskId;
use aidash_core::wire::{decode_create_response, decode_status_response, StatusUpdate};
use async_trait::async_trait;
use reqwest::Url;

use crate::service::{SubmitRequest, TaskService};

/// Errors from the task-service REST layer.
#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The task service returned a non-2xx status code.
    #[error("Task service error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body could not be decoded into the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The service answered but explicitly refused the submission.
    #[error("{0}")]
    Rejected(String),

    /// The configured base URL cannot carry path segments.
    #[error("Invalid task service URL: {0}")]
    InvalidUrl(String),
}

impl TaskServiceError {
    /// Whether a status query that failed this way should be retried.
    ///
    /// Transport failures, timeouts, 5xx, 408, 429 and undecodable bodies
    /// are transient. Other 4xx answers and explicit rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TaskServiceError::Request(_) | TaskServiceError::Malformed(_) => true,
            TaskServiceError::ApiError { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            TaskServiceError::Rejected(_) | TaskServiceError::InvalidUrl(_) => false,
        }
    }

    /// Classify a status-query failure into the task error taxonomy.
    pub fn into_poll_error(self) -> TaskError {
        match self {
            TaskServiceError::Malformed(msg) => TaskError::MalformedResponse(msg),
            other if other.is_transient() => TaskError::TransientPoll(other.to_string()),
            TaskServiceError::Rejected(msg) => TaskError::TaskFailed(msg),
            other => TaskError::TaskFailed(other.to_string()),
        }
    }

    /// Classify a submission failure.
    pub fn into_creation_error(self) -> TaskError {
        TaskError::CreationFailed(self.to_string())
    }

    /// Lift a body-decoding error out of [`aidash_core::wire`].
    fn from_decode(err: TaskError) -> Self {
        match err {
            TaskError::CreationFailed(msg) => TaskServiceError::Rejected(msg),
            other => TaskServiceError::Malformed(other.message().to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Paths of the task-service endpoints, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEndpoints {
    /// Generic submission endpoint; the body is `{"type", "params"}`.
    pub create_path: String,
    /// Status endpoint; the task id is appended as the last segment.
    pub status_path: String,
    /// Kind-specific submission endpoints. Kinds listed here are posted
    /// to their own path with the bare params as the body.
    pub kind_paths: HashMap<TaskKind, String>,
}

impl Default for TaskEndpoints {
    fn default() -> Self {
        Self {
            create_path: "/create-task".to_string(),
            status_path: "/task-status".to_string(),
            kind_paths: HashMap::new(),
        }
    }
}

impl TaskEndpoints {
    /// The per-kind `/ai/*` submission routes and `/api/task` status route
    /// served by older backends.
    pub fn legacy() -> Self {
        let kind_paths = HashMap::from([
            (TaskKind::Prompt, "/ai/generate-prompt".to_string()),
            (TaskKind::Script, "/ai/generate-script".to_string()),
            (TaskKind::Analysis, "/ai/analyze-video".to_string()),
            (TaskKind::DigitalHuman, "/ai/digital-human".to_string()),
        ]);
        Self {
            create_path: "/create-task".to_string(),
            status_path: "/api/task".to_string(),
            kind_paths,
        }
    }
}

// ---------------------------------------------------------------------------
// HttpTaskService
// ---------------------------------------------------------------------------

/// HTTP client for the backend task service.
pub struct HttpTaskService {
    client: reqwest::Client,
    base_url: Url,
    endpoints: TaskEndpoints,
}

impl HttpTaskService {
    /// Create a client for the service at `base_url` with default
    /// endpoints and no request timeout.
    pub fn new(base_url: &str) -> Result<Self, TaskServiceError> {
        Self::with_client(reqwest::Client::new(), base_url, TaskEndpoints::default())
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(
        base_url: &str,
        endpoints: TaskEndpoints,
        timeout: Duration,
    ) -> Result<Self, TaskServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(client, base_url, endpoints)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        endpoints: TaskEndpoints,
    ) -> Result<Self, TaskServiceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TaskServiceError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(TaskServiceError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client,
            base_url,
            endpoints,
        })
    }

    /// URL a job of `kind` is submitted to.
    pub fn submission_url(&self, kind: TaskKind) -> Result<Url, TaskServiceError> {
        let path = self
            .endpoints
            .kind_paths
            .get(&kind)
            .unwrap_or(&self.endpoints.create_path);
        self.endpoint(path, None)
    }

    /// URL of the status query for `task_id`.
    pub fn status_url(&self, task_id: &str) -> Result<Url, TaskServiceError> {
        self.endpoint(&self.endpoints.status_path, Some(task_id))
    }

    // ---- private helpers ----

    /// Join `path` (and an optional percent-encoded id) onto the base URL.
    fn endpoint(&self, path: &str, id: Option<&str>) -> Result<Url, TaskServiceError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| TaskServiceError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Build the submission body: kind-specific endpoints take the bare
    /// params, the generic endpoint takes `{"type", "params"}`.
    fn submission_body(&self, request: &SubmitRequest) -> serde_json::Value {
        if self.endpoints.kind_paths.contains_key(&request.kind) {
            request.params.clone()
        } else {
            serde_json::json!({
                "type": request.kind,
                "params": request.params,
            })
        }
    }

    /// Ensure the response has a success status code. Returns the body
    /// text on success, or an [`TaskServiceError::ApiError`] containing the
    /// status and body text on failure.
    async fn success_body(response: reqwest::Response) -> Result<String, TaskServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TaskServiceError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn create_task(&self, request: &SubmitRequest) -> Result<TaskId, TaskServiceError> {
        let url = self.submission_url(request.kind)?;
        let body = self.submission_body(request);

        let response = self.client.post(url.clone()).json(&body).send().await?;
        let text = Self::success_body(response).await?;
        let task_id = decode_create_response(&text).map_err(TaskServiceError::from_decode)?;

        tracing::info!(
            task_id = %task_id,
            kind = %request.kind,
            url = %url,
            "Task submitted",
        );
        Ok(task_id)
    }

    async fn fetch_status(&self, task_id: &str) -> Result<StatusUpdate, TaskServiceError> {
        let url = self.status_url(task_id)?;
        let response = self.client.get(url).send().await?;
        let text = Self::success_body(response).await?;
        let update = decode_status_response(&text).map_err(TaskServiceError::from_decode)?;

        tracing::debug!(
            task_id = %task_id,
            status = %update.status,
            progress = ?update.progress,
            "Status query answered",
        );
        Ok(update)
    }
}
