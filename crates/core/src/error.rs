#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Failure modes of a task as seen by producers and consumers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task could not be submitted. No poller is started.
    #[error("Task creation failed: {0}")]
    CreationFailed(String),

    /// Network, timeout or 5xx while querying status. Retried locally.
    #[error("Transient poll error: {0}")]
    TransientPoll(String),

    /// The transport succeeded but the body could not be decoded.
    /// Treated like a transient error by the poller.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The server reported the task as failed. Terminal.
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl TaskError {
    /// Whether the poller should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TaskError::TransientPoll(_) | TaskError::MalformedResponse(_)
        )
    }

    /// The payload without the variant prefix, as stored on a failed task.
    pub fn message(&self) -> &str {
        match self {
            TaskError::CreationFailed(msg)
            | TaskError::TransientPoll(msg)
            | TaskError::MalformedResponse(msg)
            | TaskError::TaskFailed(msg) => msg,
        }
    }
}
