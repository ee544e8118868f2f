//! The task entity and its status state machine.
//!
//! A [`Task`] is the client-side record of one submitted backend job.
//! Changes arrive as [`TaskPatch`]es and are merged by [`Task::merge`],
//! which is the single place the entity invariants are enforced:
//!
//! - status only moves forward (`pending < queued < processing < terminal`)
//!   and never leaves `completed` / `failed`;
//! - `progress` never decreases and is frozen once terminal;
//! - `result` only accompanies `completed`, `error` only accompanies
//!   `failed`, and neither is overwritten once set;
//! - a patch stamped by the server earlier than the last accepted server
//!   stamp is stale.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{TaskId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound of the progress percentage.
pub const MAX_PROGRESS: u8 = 100;

/// Error message recorded when the server declares failure without one.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Task failed";

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// The type of AI job a task represents. Immutable once the task exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Video prompt generation from an image / video / description.
    Prompt,
    /// E-commerce script generation from product information.
    Script,
    /// Video style analysis.
    Analysis,
    /// Digital-human rendering.
    DigitalHuman,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Prompt => "prompt",
            TaskKind::Script => "script",
            TaskKind::Analysis => "analysis",
            TaskKind::DigitalHuman => "digital_human",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    /// Accepts the snake_case label plus the kebab / camel spellings the
    /// backend has used for digital-human jobs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(TaskKind::Prompt),
            "script" => Ok(TaskKind::Script),
            "analysis" => Ok(TaskKind::Analysis),
            "digital_human" | "digital-human" | "digitalhuman" => Ok(TaskKind::DigitalHuman),
            other => Err(CoreError::Validation(format!("Unknown task kind '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Position in the forward order. Both terminal states share a rank.
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Queued => 1,
            TaskStatus::Processing => 2,
            TaskStatus::Completed | TaskStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Staying in the same non-terminal status is legal (progress
    /// updates). Forward skips are legal because polling samples the
    /// server and can miss intermediate states.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Map a status label from the task service. The legacy `done` label
    /// is normalized to [`TaskStatus::Completed`].
    pub fn from_wire(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "queued" => Some(TaskStatus::Queued),
            "processing" => Some(TaskStatus::Processing),
            "completed" | "done" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskPatch
// ---------------------------------------------------------------------------

/// A partial update to a [`Task`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Server-side timestamp of the state this patch describes, if known.
    pub updated_at: Option<Timestamp>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// A patch marking the task completed with the given result.
    pub fn completed(result: serde_json::Value) -> Self {
        Self::status(TaskStatus::Completed).with_result(result)
    }

    /// A patch marking the task failed with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::status(TaskStatus::Failed).with_error(message)
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

/// Why a patch was refused. The entity is left untouched in every case.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchRejection {
    #[error("status regression from {from} to {to}")]
    StatusRegression { from: TaskStatus, to: TaskStatus },

    #[error("task is {status}; its outcome cannot be overwritten")]
    TerminalLocked { status: TaskStatus },

    #[error("stale update stamped {incoming}, last accepted {current}")]
    Stale {
        incoming: Timestamp,
        current: Timestamp,
    },

    #[error("invalid patch: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Client-side record of one submitted backend job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Completion percentage (0-100).
    pub progress: u8,
    /// Present only when `status` is `completed`.
    pub result: Option<serde_json::Value>,
    /// Present only when `status` is `failed`.
    pub error: Option<String>,
    pub created_at: Timestamp,
    /// Local time the last accepted change was applied.
    pub updated_at: Timestamp,
    /// Server stamp of the last accepted change, used to drop stale
    /// responses.
    pub source_updated_at: Option<Timestamp>,
}

impl Task {
    /// A freshly created task in the `pending` state.
    pub fn new(id: impl Into<TaskId>, kind: TaskKind) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            source_updated_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge `patch` into a copy of this task.
    ///
    /// Returns `Ok(Some(task))` with the updated entity, `Ok(None)` when
    /// the patch is acceptable but changes nothing (a repeated poll
    /// response, a lower progress value), or the reason it was refused.
    pub fn merge(&self, patch: &TaskPatch, now: Timestamp) -> Result<Option<Task>, PatchRejection> {
        let target = patch.status.unwrap_or(self.status);
        validate_patch_shape(patch, target)?;

        if let (Some(incoming), Some(current)) = (patch.updated_at, self.source_updated_at) {
            if incoming < current {
                return Err(PatchRejection::Stale { incoming, current });
            }
        }

        if self.is_terminal() {
            return self.merge_into_terminal(patch, target);
        }

        if !self.status.can_transition_to(target) {
            return Err(PatchRejection::StatusRegression {
                from: self.status,
                to: target,
            });
        }

        let mut next = self.clone();
        next.status = target;

        // Progress is monotonic; a lower value is ignored, not rejected,
        // so a status advance in the same patch still lands.
        if let Some(progress) = patch.progress {
            next.progress = next.progress.max(progress);
        }

        match target {
            TaskStatus::Completed => next.result = patch.result.clone(),
            TaskStatus::Failed => {
                next.error = Some(
                    patch
                        .error
                        .clone()
                        .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                );
            }
            _ => {}
        }

        if next.same_state(self) {
            return Ok(None);
        }

        next.updated_at = now;
        if patch.updated_at.is_some() {
            next.source_updated_at = patch.updated_at;
        }
        Ok(Some(next))
    }

    /// A terminal task only accepts exact repeats of its outcome.
    fn merge_into_terminal(
        &self,
        patch: &TaskPatch,
        target: TaskStatus,
    ) -> Result<Option<Task>, PatchRejection> {
        if !target.is_terminal() {
            return Err(PatchRejection::StatusRegression {
                from: self.status,
                to: target,
            });
        }
        if target != self.status {
            return Err(PatchRejection::TerminalLocked {
                status: self.status,
            });
        }

        let result_changes = patch
            .result
            .as_ref()
            .is_some_and(|r| self.result.as_ref() != Some(r));
        let error_changes = patch
            .error
            .as_ref()
            .is_some_and(|e| self.error.as_ref() != Some(e));
        if result_changes || error_changes {
            return Err(PatchRejection::TerminalLocked {
                status: self.status,
            });
        }

        Ok(None)
    }

    fn same_state(&self, other: &Task) -> bool {
        self.status == other.status
            && self.progress == other.progress
            && self.result == other.result
            && self.error == other.error
    }
}

fn validate_patch_shape(patch: &TaskPatch, target: TaskStatus) -> Result<(), PatchRejection> {
    if patch.result.is_some() && target != TaskStatus::Completed {
        return Err(PatchRejection::Invalid(format!(
            "result supplied with status {target}"
        )));
    }
    if patch.error.is_some() && target != TaskStatus::Failed {
        return Err(PatchRejection::Invalid(format!(
            "error supplied with status {target}"
        )));
    }
    if let Some(progress) = patch.progress {
        if progress > MAX_PROGRESS {
            return Err(PatchRejection::Invalid(format!(
                "progress {progress} exceeds {MAX_PROGRESS}"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn task_in(status: TaskStatus) -> Task {
        let mut task = Task::new("t1", TaskKind::Analysis);
        task.status = status;
        task
    }

    fn apply(task: &Task, patch: TaskPatch) -> Task {
        task.merge(&patch, Utc::now())
            .expect("patch should be accepted")
            .expect("patch should change the task")
    }

    #[test]
    fn new_task_is_pending_with_zero_progress() {
        let task = Task::new("t1", TaskKind::Script);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn documented_transitions_are_allowed() {
        use TaskStatus::*;
        for (from, to) in [
            (Pending, Queued),
            (Queued, Processing),
            (Processing, Completed),
            (Processing, Failed),
            (Pending, Processing),
            (Pending, Failed),
            (Queued, Completed),
            (Processing, Processing),
        ] {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        use TaskStatus::*;
        for from in [Completed, Failed] {
            for to in [Pending, Queued, Processing, Completed, Failed] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn done_label_normalizes_to_completed() {
        assert_eq!(TaskStatus::from_wire("done"), Some(TaskStatus::Completed));
        assert_eq!(TaskStatus::from_wire("Completed"), Some(TaskStatus::Completed));
        assert_eq!(TaskStatus::from_wire("running"), None);
    }

    #[test]
    fn kind_parses_alternate_spellings() {
        assert_eq!("digital-human".parse::<TaskKind>().unwrap(), TaskKind::DigitalHuman);
        assert_eq!("Analysis".parse::<TaskKind>().unwrap(), TaskKind::Analysis);
        assert!("video".parse::<TaskKind>().is_err());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_value(TaskKind::DigitalHuman).unwrap();
        assert_eq!(json, json!("digital_human"));
    }

    #[test]
    fn progress_advances_while_processing() {
        let task = task_in(TaskStatus::Processing);
        let task = apply(&task, TaskPatch::status(TaskStatus::Processing).with_progress(40));
        assert_eq!(task.progress, 40);
    }

    #[test]
    fn lower_progress_is_ignored() {
        let mut task = task_in(TaskStatus::Processing);
        task.progress = 60;
        let outcome = task
            .merge(&TaskPatch::status(TaskStatus::Processing).with_progress(30), Utc::now())
            .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn lower_progress_does_not_block_status_advance() {
        let mut task = task_in(TaskStatus::Processing);
        task.progress = 80;
        let task = apply(&task, TaskPatch::completed(json!({"ok": true})).with_progress(0));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 80);
    }

    #[test]
    fn regression_is_rejected() {
        let task = task_in(TaskStatus::Processing);
        let err = task
            .merge(&TaskPatch::status(TaskStatus::Queued), Utc::now())
            .unwrap_err();
        assert_matches!(
            err,
            PatchRejection::StatusRegression {
                from: TaskStatus::Processing,
                to: TaskStatus::Queued
            }
        );
    }

    #[test]
    fn completed_never_returns_to_processing() {
        let task = apply(
            &task_in(TaskStatus::Processing),
            TaskPatch::completed(json!({"fps": 30})),
        );
        let err = task
            .merge(&TaskPatch::status(TaskStatus::Processing).with_progress(99), Utc::now())
            .unwrap_err();
        assert_matches!(err, PatchRejection::StatusRegression { .. });
    }

    #[test]
    fn repeated_terminal_response_is_a_noop() {
        let task = apply(
            &task_in(TaskStatus::Processing),
            TaskPatch::completed(json!({"fps": 30})),
        );
        let outcome = task
            .merge(&TaskPatch::completed(json!({"fps": 30})), Utc::now())
            .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn terminal_result_cannot_be_overwritten() {
        let task = apply(
            &task_in(TaskStatus::Processing),
            TaskPatch::completed(json!({"fps": 30})),
        );
        let err = task
            .merge(&TaskPatch::completed(json!({"fps": 60})), Utc::now())
            .unwrap_err();
        assert_matches!(err, PatchRejection::TerminalLocked { .. });
    }

    #[test]
    fn completed_cannot_flip_to_failed() {
        let task = apply(
            &task_in(TaskStatus::Processing),
            TaskPatch::completed(json!({})),
        );
        let err = task.merge(&TaskPatch::failed("late"), Utc::now()).unwrap_err();
        assert_matches!(err, PatchRejection::TerminalLocked { .. });
    }

    #[test]
    fn failure_without_message_gets_default() {
        let task = apply(
            &task_in(TaskStatus::Queued),
            TaskPatch::status(TaskStatus::Failed),
        );
        assert_eq!(task.error.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        assert!(task.result.is_none());
    }

    #[test]
    fn result_with_non_completed_status_is_invalid() {
        let task = task_in(TaskStatus::Queued);
        let patch = TaskPatch::status(TaskStatus::Processing).with_result(json!({}));
        assert_matches!(
            task.merge(&patch, Utc::now()),
            Err(PatchRejection::Invalid(_))
        );
    }

    #[test]
    fn progress_above_100_is_invalid() {
        let task = task_in(TaskStatus::Processing);
        let patch = TaskPatch::status(TaskStatus::Processing).with_progress(101);
        assert_matches!(
            task.merge(&patch, Utc::now()),
            Err(PatchRejection::Invalid(_))
        );
    }

    #[test]
    fn stale_server_stamp_is_rejected() {
        let now = Utc::now();
        let task = apply(
            &task_in(TaskStatus::Queued),
            TaskPatch::status(TaskStatus::Processing).with_updated_at(now),
        );
        let patch = TaskPatch::status(TaskStatus::Processing)
            .with_progress(50)
            .with_updated_at(now - Duration::seconds(5));
        assert_matches!(
            task.merge(&patch, Utc::now()),
            Err(PatchRejection::Stale { .. })
        );
    }

    #[test]
    fn accepted_patch_records_timestamps() {
        let stamp = Utc::now() - Duration::seconds(30);
        let task = task_in(TaskStatus::Queued);
        let now = Utc::now();
        let next = task
            .merge(&TaskPatch::status(TaskStatus::Processing).with_updated_at(stamp), now)
            .unwrap()
            .unwrap();
        assert_eq!(next.updated_at, now);
        assert_eq!(next.source_updated_at, Some(stamp));
    }
}
