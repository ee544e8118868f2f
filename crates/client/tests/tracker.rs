//! Integration tests for [`TaskTracker`] and [`TaskWatch`].
//!
//! Cover the producer flow (placeholder, submission, polling), the
//! consumer flow (attach, cold seeding, observe-only watches) and
//! shutdown.

mod common;

use std::time::Duration;

use aidash_client::poller::PollOutcome;
use aidash_client::service::SubmitRequest;
use aidash_client::tracker::{TaskTracker, TrackerError, PLACEHOLDER_PREFIX};
use aidash_core::error::TaskError;
use aidash_core::task::{TaskKind, TaskStatus};
use aidash_core::wire::StatusUpdate;
use aidash_events::TaskEvent;
use assert_matches::assert_matches;
use serde_json::json;

use common::{registry, status, test_poll_config, ScriptedService};

fn tracker(service: &ScriptedService) -> TaskTracker {
    TaskTracker::new(registry(), service.clone().into_service(), test_poll_config())
}

// ---------------------------------------------------------------------------
// Test: submit
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn submit_tracks_task_to_completion() {
    let service = ScriptedService::new();
    service.push_created(Ok("srv-1"));
    service
        .push_status("srv-1", status(TaskStatus::Queued, 0))
        .push_status("srv-1", status(TaskStatus::Processing, 40))
        .push_status(
            "srv-1",
            StatusUpdate::new(TaskStatus::Completed)
                .with_progress(100)
                .with_result(json!({"prompt": "a neon-lit alley at dusk"})),
        );
    let tracker = tracker(&service);

    let mut watch = tracker
        .submit(SubmitRequest::new(TaskKind::Prompt, json!({"image": "ref.png"})))
        .await
        .expect("submission accepted");

    assert_eq!(watch.task_id(), "srv-1");
    assert!(watch.owns_poller());

    let result = watch.wait_result().await.expect("completed");
    assert_eq!(result, Some(json!({"prompt": "a neon-lit alley at dusk"})));

    assert_matches!(watch.finish().await, Some(PollOutcome::Finished(_)));
    assert_eq!(tracker.registry().active_poller_count(), 0);
    assert_eq!(tracker.registry().len(), 1);
    assert_eq!(service.submissions()[0].kind, TaskKind::Prompt);
}

#[tokio::test(start_paused = true)]
async fn placeholder_is_replaced_by_server_id() {
    let service = ScriptedService::new();
    service.push_created(Ok("srv-2"));
    service.push_status("srv-2", StatusUpdate::new(TaskStatus::Completed));
    let tracker = tracker(&service);
    let mut rx = tracker.registry().subscribe();

    let watch = tracker
        .submit(SubmitRequest::new(TaskKind::Script, json!({"product": "mug"})))
        .await
        .unwrap();
    watch.finish().await;

    let events: Vec<TaskEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_matches!(
        &events[0],
        TaskEvent::Created { task } if task.id.starts_with(PLACEHOLDER_PREFIX)
            && task.status == TaskStatus::Pending
    );
    assert_matches!(&events[1], TaskEvent::Removed { task } if task.id.starts_with(PLACEHOLDER_PREFIX));
    assert_matches!(
        &events[2],
        TaskEvent::Created { task } if task.id == "srv-2" && task.kind == TaskKind::Script
    );

    let ids: Vec<String> = tracker.registry().snapshot().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["srv-2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn failed_submission_leaves_failed_placeholder() {
    let service = ScriptedService::new();
    service.push_created(Err("daily quota exceeded"));
    let tracker = tracker(&service);

    let err = tracker
        .submit(SubmitRequest::new(TaskKind::Analysis, json!({"video": "a.mp4"})))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        TrackerError::Task(TaskError::CreationFailed(msg)) if msg == "daily quota exceeded"
    );

    let tasks = tracker.registry().snapshot();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].id.starts_with(PLACEHOLDER_PREFIX));
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasks[0].error.as_deref(), Some("daily quota exceeded"));
    // No poller is started for a task the service never accepted.
    assert_eq!(tracker.registry().active_poller_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_placeholders_can_be_cleared() {
    let service = ScriptedService::new();
    service
        .push_created(Err("daily quota exceeded"))
        .push_created(Ok("srv-7"))
        .push_created(Err("model offline"));
    service.push_status("srv-7", StatusUpdate::new(TaskStatus::Failed).with_error("bad input"));
    let tracker = tracker(&service);

    let request = || SubmitRequest::new(TaskKind::Analysis, json!({"video": "a.mp4"}));
    assert!(tracker.submit(request()).await.is_err());
    let watch = tracker.submit(request()).await.expect("accepted");
    assert_matches!(watch.finish().await, Some(PollOutcome::Finished(_)));
    assert!(tracker.submit(request()).await.is_err());
    assert_eq!(tracker.registry().len(), 3);

    assert_eq!(tracker.clear_failed_placeholders(), 2);

    // A failed task the service issued is kept.
    let ids: Vec<String> = tracker.registry().snapshot().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["srv-7".to_string()]);
    assert_eq!(tracker.clear_failed_placeholders(), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_params_are_rejected_before_submission() {
    let service = ScriptedService::new();
    let tracker = tracker(&service);

    let err = tracker
        .submit(SubmitRequest::new(TaskKind::Script, json!(["not", "an", "object"])))
        .await
        .unwrap_err();

    assert_matches!(err, TrackerError::Validation(_));
    assert!(service.submissions().is_empty());
    assert!(tracker.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn server_failure_surfaces_through_wait_result() {
    let service = ScriptedService::new();
    service.push_created(Ok("srv-3"));
    service.push_status(
        "srv-3",
        StatusUpdate::new(TaskStatus::Failed).with_error("video too long"),
    );
    let tracker = tracker(&service);

    let mut watch = tracker
        .submit(SubmitRequest::new(TaskKind::Analysis, json!({"video": "long.mp4"})))
        .await
        .unwrap();

    let err = watch.wait_result().await.unwrap_err();
    assert_matches!(err, TrackerError::Task(TaskError::TaskFailed(msg)) if msg == "video too long");
}

// ---------------------------------------------------------------------------
// Test: attach
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cold_attach_seeds_task_with_hint() {
    let service = ScriptedService::new();
    service
        .push_status("srv-9", status(TaskStatus::Processing, 70))
        .push_status("srv-9", StatusUpdate::new(TaskStatus::Completed));
    let tracker = tracker(&service);

    let mut watch = tracker.attach("srv-9", Some(TaskKind::DigitalHuman));
    assert!(watch.current().is_none());

    let task = watch.wait_terminal().await.expect("completes");
    assert_eq!(task.kind, TaskKind::DigitalHuman);
    assert_eq!(task.progress, 70);
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn second_attach_only_observes() {
    let service = ScriptedService::new();
    service
        .push_status("srv-4", status(TaskStatus::Processing, 10))
        .push_status("srv-4", status(TaskStatus::Processing, 60))
        .push_status("srv-4", StatusUpdate::new(TaskStatus::Completed));
    let tracker = tracker(&service);

    let owner = tracker.attach("srv-4", None);
    let mut observer = tracker.attach("srv-4", None);

    assert!(owner.owns_poller());
    assert!(!observer.owns_poller());
    assert_eq!(tracker.registry().active_poller_count(), 1);

    let task = observer.wait_terminal().await.expect("completes");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(service.queries("srv-4"), 3);
    assert!(observer.finish().await.is_none());
    drop(owner);
}

#[tokio::test(start_paused = true)]
async fn attach_to_finished_task_issues_no_queries() {
    let service = ScriptedService::new();
    service.push_status("srv-5", StatusUpdate::new(TaskStatus::Completed));
    let tracker = tracker(&service);

    tracker.attach("srv-5", None).finish().await;
    assert_eq!(service.queries("srv-5"), 1);

    let mut again = tracker.attach("srv-5", None);
    assert_eq!(again.wait_terminal().await.unwrap().status, TaskStatus::Completed);
    assert_matches!(again.finish().await, Some(PollOutcome::Finished(_)));
    assert_eq!(service.queries("srv-5"), 1);
}

// ---------------------------------------------------------------------------
// Test: cancellation and shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dropping_the_watch_stops_polling() {
    let service = ScriptedService::new();
    service.push_status("srv-6", status(TaskStatus::Processing, 5));
    let tracker = tracker(&service);

    let watch = tracker.attach("srv-6", Some(TaskKind::Script));
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(watch);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(service.queries("srv-6"), 1);
    assert_eq!(tracker.registry().active_poller_count(), 0);
    // The task keeps its last known state.
    assert_eq!(tracker.registry().get("srv-6").unwrap().progress, 5);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_every_poller() {
    let service = ScriptedService::new();
    service.push_status("a", status(TaskStatus::Processing, 1));
    service.push_status("b", status(TaskStatus::Queued, 0));
    let tracker = tracker(&service);

    let a = tracker.attach("a", None);
    let b = tracker.attach("b", None);
    tokio::time::sleep(Duration::from_millis(50)).await;

    tracker.shutdown();

    assert_matches!(a.finish().await, Some(PollOutcome::Cancelled));
    assert_matches!(b.finish().await, Some(PollOutcome::Cancelled));
    assert_eq!(tracker.registry().active_poller_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_stops_pollers_through_removal() {
    let service = ScriptedService::new();
    service.push_status("srv-7", status(TaskStatus::Processing, 20));
    let tracker = tracker(&service);

    let mut watch = tracker.attach("srv-7", None);
    while watch.current().map(|t| t.progress) != Some(20) {
        watch.changed().await.expect("registry alive");
    }

    tracker.registry().reset();

    assert_matches!(watch.finish().await, Some(PollOutcome::Removed));
}
