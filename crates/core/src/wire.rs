//! Validating decode of task-service payloads.
//!
//! The task service has shipped several response shapes over time. Every
//! body goes through this module and comes out either as a well-formed
//! [`StatusUpdate`] / task id, or as a [`TaskError`]. Nothing partially
//! trusted reaches the registry.
//!
//! Accepted status bodies:
//!
//! ```json
//! {"status": "processing", "progress": 40, "updatedAt": 1718000000000}
//! {"success": true, "task": {"status": "done", "result": "{\"fps\":30}"}}
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::TaskError;
use crate::task::{TaskKind, TaskPatch, TaskStatus, MAX_PROGRESS};
use crate::types::{TaskId, Timestamp};

/// A decoded status query response.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub progress: Option<u8>,
    /// Only populated for `completed`.
    pub result: Option<Value>,
    /// Only populated for `failed`.
    pub error: Option<String>,
    pub updated_at: Option<Timestamp>,
    /// Job type, when the server echoes it. Used to seed tasks the client
    /// has never seen.
    pub kind: Option<TaskKind>,
}

impl StatusUpdate {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            progress: None,
            result: None,
            error: None,
            updated_at: None,
            kind: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Translate into a registry patch.
    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            status: Some(self.status),
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTaskStatus {
    status: String,
    #[serde(default)]
    progress: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default, rename = "updatedAt", alias = "updated_at")]
    updated_at: Option<Value>,
    #[serde(default, rename = "type", alias = "kind")]
    kind: Option<String>,
}

// ---------------------------------------------------------------------------
// Status responses
// ---------------------------------------------------------------------------

/// Decode the body of `GET /task-status/{id}`.
pub fn decode_status_response(body: &str) -> Result<StatusUpdate, TaskError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TaskError::MalformedResponse(format!("status body is not JSON: {e}")))?;
    decode_status_value(value)
}

/// Decode an already-parsed status body, unwrapping the
/// `{success, task}` envelope when present.
pub fn decode_status_value(value: Value) -> Result<StatusUpdate, TaskError> {
    let inner = unwrap_envelope(value)?;
    let raw: RawTaskStatus = serde_json::from_value(inner)
        .map_err(|e| TaskError::MalformedResponse(format!("invalid status body: {e}")))?;

    let status = TaskStatus::from_wire(&raw.status).ok_or_else(|| {
        TaskError::MalformedResponse(format!("unknown status label '{}'", raw.status))
    })?;

    let progress = raw.progress.map(parse_progress).transpose()?.flatten();
    let updated_at = raw.updated_at.map(parse_timestamp).transpose()?.flatten();
    let kind = raw.kind.and_then(|k| k.parse::<TaskKind>().ok());

    let result = match status {
        TaskStatus::Completed => raw.result.map(parse_result).transpose()?.flatten(),
        _ => None,
    };
    let error = match status {
        TaskStatus::Failed => raw.error.and_then(error_message),
        _ => None,
    };

    Ok(StatusUpdate {
        status,
        progress,
        result,
        error,
        updated_at,
        kind,
    })
}

fn unwrap_envelope(value: Value) -> Result<Value, TaskError> {
    let Value::Object(mut map) = value else {
        return Err(TaskError::MalformedResponse(
            "status body is not a JSON object".to_string(),
        ));
    };

    if map.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = map
            .get("error")
            .or_else(|| map.get("message"))
            .cloned()
            .and_then(error_message)
            .unwrap_or_else(|| "server reported success=false".to_string());
        return Err(TaskError::MalformedResponse(reason));
    }

    match map.remove("task") {
        Some(task @ Value::Object(_)) => Ok(task),
        Some(Value::Null) | None if map.contains_key("status") => Ok(Value::Object(map)),
        Some(_) => Err(TaskError::MalformedResponse(
            "envelope 'task' is not an object".to_string(),
        )),
        None => Err(TaskError::MalformedResponse(
            "status body has no 'status' or 'task' field".to_string(),
        )),
    }
}

/// Decode a `result` that may be an embedded JSON value or a JSON-encoded
/// string. Empty strings and `null` mean "no result".
pub fn parse_result(value: Value) -> Result<Option<Value>, TaskError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| TaskError::MalformedResponse(format!("result is not valid JSON: {e}"))),
        other => Ok(Some(other)),
    }
}

fn parse_progress(value: Value) -> Result<Option<u8>, TaskError> {
    let number = match &value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(Some(n.round().clamp(0.0, f64::from(MAX_PROGRESS)) as u8)),
        _ => Err(TaskError::MalformedResponse(format!(
            "progress is not a number: {value}"
        ))),
    }
}

fn parse_timestamp(value: Value) -> Result<Option<Timestamp>, TaskError> {
    let parsed = match &value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(millis) => DateTime::<Utc>::from_timestamp_millis(millis),
                Err(_) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc)),
            }
        }
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| {
        TaskError::MalformedResponse(format!("updatedAt is not a timestamp: {value}"))
    })
}

fn error_message(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        Value::Object(ref map) => match map.get("message") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => Some(value.to_string()),
        },
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Creation responses
// ---------------------------------------------------------------------------

/// Decode the body of a task-creation call into the server-issued id.
///
/// `{"success": false, ...}` is a [`TaskError::CreationFailed`]; a body
/// without a usable id is a [`TaskError::MalformedResponse`].
pub fn decode_create_response(body: &str) -> Result<TaskId, TaskError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TaskError::MalformedResponse(format!("creation body is not JSON: {e}")))?;

    let Value::Object(map) = value else {
        return Err(TaskError::MalformedResponse(
            "creation body is not a JSON object".to_string(),
        ));
    };

    if map.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = map
            .get("error")
            .or_else(|| map.get("message"))
            .cloned()
            .and_then(error_message)
            .unwrap_or_else(|| "task service rejected the submission".to_string());
        return Err(TaskError::CreationFailed(reason));
    }

    let id = ["taskId", "task_id", "id"]
        .iter()
        .find_map(|key| map.get(*key))
        .and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty());

    id.ok_or_else(|| TaskError::MalformedResponse("creation body has no taskId".to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
