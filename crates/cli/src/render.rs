//! Terminal rendering of task snapshots.

use aidash_core::task::{Task, TaskStatus, MAX_PROGRESS};

const BAR_WIDTH: usize = 20;

/// One-line summary of a task, e.g.
/// `srv-1 [analysis] processing [########------------]  40%`.
pub fn status_line(task: &Task) -> String {
    let head = format!("{} [{}] {}", task.id, task.kind, task.status);
    match task.status {
        TaskStatus::Failed => format!(
            "{head}: {}",
            task.error.as_deref().unwrap_or("no error message")
        ),
        TaskStatus::Completed => format!("{head} {} 100%", progress_bar(MAX_PROGRESS, BAR_WIDTH)),
        _ => format!(
            "{head} {} {:>3}%",
            progress_bar(task.progress, BAR_WIDTH),
            task.progress
        ),
    }
}

/// Fixed-width bar with `#` for the completed share.
pub fn progress_bar(progress: u8, width: usize) -> String {
    let filled = usize::from(progress.min(MAX_PROGRESS)) * width / usize::from(MAX_PROGRESS);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
