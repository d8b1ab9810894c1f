use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use progress_core::ProgressTracker;
use progress_core::config::TrackerConfig;
use progress_core::models::{FrameKind, ProgressFrame, TaskId, TaskPatch, TaskStatus};
use progress_core::observer::{
    ClosedFuture, DeliveryError, ProgressReceiver, ProgressSink, progress_channel,
};
use serde_json::json;

fn fast_teardown_config() -> TrackerConfig {
    TrackerConfig {
        teardown_delay_ms: 50,
        ..TrackerConfig::default()
    }
}

fn task_id(raw: &str) -> TaskId {
    TaskId::new(raw).unwrap()
}

fn subscribe(tracker: &ProgressTracker, id: &TaskId) -> ProgressReceiver {
    let (sink, receiver) = progress_channel();
    assert!(tracker.register_observer(id, Arc::new(sink)));
    receiver
}

async fn next_frame(receiver: &mut ProgressReceiver) -> Option<ProgressFrame> {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("timed out waiting for observer channel")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Accepts a fixed number of frames, then behaves like a dead connection.
struct FlakySink {
    remaining: AtomicUsize,
    pushed: AtomicUsize,
    closes: AtomicUsize,
}

impl FlakySink {
    fn accepting(frames: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(frames),
            pushed: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }
}

impl ProgressSink for FlakySink {
    fn push(&self, _frame: ProgressFrame) -> Result<(), DeliveryError> {
        let accepted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if accepted {
            self.pushed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            Err(DeliveryError::Failed("connection reset".to_string()))
        }
    }

    fn close(&self) -> Result<(), DeliveryError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn closed(&self) -> ClosedFuture<'_> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn observers_cannot_watch_unknown_tasks() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let ghost = task_id("ghost");

    let (first, _first_rx) = progress_channel();
    let (second, _second_rx) = progress_channel();

    assert!(!tracker.register_observer(&ghost, Arc::new(first)));
    assert!(!tracker.register_observer(&ghost, Arc::new(second)));
    assert_eq!(tracker.get_task(&ghost), None);
    assert_eq!(tracker.observer_count(&ghost), 0);
}

#[tokio::test]
async fn new_observer_immediately_receives_current_snapshot() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("late-joiner");
    tracker.create(id.clone(), 100, None);
    tracker.update(
        &id,
        TaskPatch::new()
            .stage("INSERTING_ROLES")
            .current(40)
            .status(TaskStatus::Running),
    );

    let mut receiver = subscribe(&tracker, &id);
    let frame = next_frame(&mut receiver).await.unwrap();

    assert_eq!(frame.kind, FrameKind::Progress);
    assert_eq!(frame.task, tracker.get_task(&id).unwrap());
    assert_eq!(tracker.observer_count(&id), 1);
    assert_eq!(tracker.observer_connections(&id).len(), 1);
}

#[tokio::test]
async fn every_frame_carries_the_full_snapshot() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("full-frames");
    tracker.create(id.clone(), 10, None);
    let mut receiver = subscribe(&tracker, &id);
    next_frame(&mut receiver).await.unwrap();

    tracker.update(
        &id,
        TaskPatch::new()
            .message("inserting permissions")
            .status(TaskStatus::Running),
    );
    tracker.update(&id, TaskPatch::new().current(3));

    let first = next_frame(&mut receiver).await.unwrap();
    let second = next_frame(&mut receiver).await.unwrap();

    assert_eq!(first.task.message, "inserting permissions");
    assert_eq!(second.task.message, "inserting permissions");
    assert_eq!(second.task.status, TaskStatus::Running);
    assert_eq!(second.task.current, 3);
    assert_eq!(second.task, tracker.get_task(&id).unwrap());
}

#[tokio::test]
async fn failing_observer_is_pruned_without_affecting_others() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("isolated");
    tracker.create(id.clone(), 10, None);

    let flaky = Arc::new(FlakySink::accepting(1));
    assert!(tracker.register_observer(&id, flaky.clone()));
    let mut healthy = subscribe(&tracker, &id);
    next_frame(&mut healthy).await.unwrap();
    assert_eq!(tracker.observer_count(&id), 2);

    tracker.update(&id, TaskPatch::new().current(4));

    let frame = next_frame(&mut healthy).await.unwrap();
    assert_eq!(frame.task.current, 4);
    assert_eq!(tracker.observer_count(&id), 1);
    assert_eq!(flaky.pushed.load(Ordering::SeqCst), 1);
    assert_eq!(flaky.closes.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.get_task(&id).unwrap().current, 4);

    tracker.update(&id, TaskPatch::new().current(5));
    assert_eq!(next_frame(&mut healthy).await.unwrap().task.current, 5);
    assert_eq!(flaky.pushed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sink_rejecting_initial_snapshot_is_not_registered() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("dead-on-arrival");
    tracker.create(id.clone(), 10, None);

    assert!(!tracker.register_observer(&id, Arc::new(FlakySink::accepting(0))));
    assert_eq!(tracker.observer_count(&id), 0);
}

#[tokio::test]
async fn failure_sends_one_error_frame_then_closes_channel() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("doomed");
    tracker.create(id.clone(), 10, None);
    let mut receiver = subscribe(&tracker, &id);
    next_frame(&mut receiver).await.unwrap();

    tracker.fail(&id, "disk full");

    let frame = next_frame(&mut receiver).await.unwrap();
    assert_eq!(frame.kind, FrameKind::Error);
    assert_eq!(frame.task.error.as_deref(), Some("disk full"));
    assert_eq!(frame.task.status, TaskStatus::Failed);

    assert!(next_frame(&mut receiver).await.is_none());
    assert_eq!(tracker.observer_count(&id), 0);
    assert_eq!(tracker.pending_teardowns(), 0);
}

#[tokio::test]
async fn completion_frame_precedes_delayed_close() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("finished");
    tracker.create(id.clone(), 10, None);
    let mut receiver = subscribe(&tracker, &id);
    next_frame(&mut receiver).await.unwrap();

    tracker.complete(&id, Some(json!({ "count": 42 })), None);

    assert_eq!(tracker.pending_teardowns(), 1);
    assert_eq!(tracker.observer_count(&id), 1);

    let frame = next_frame(&mut receiver).await.unwrap();
    assert_eq!(frame.kind, FrameKind::Completed);
    assert_eq!(frame.task.percentage, 100.0);
    assert_eq!(frame.task.result, Some(json!({ "count": 42 })));

    assert!(next_frame(&mut receiver).await.is_none());
    assert_eq!(tracker.observer_count(&id), 0);
}

#[tokio::test]
async fn dropping_tracker_closes_channels_awaiting_teardown() {
    let tracker = ProgressTracker::new(TrackerConfig {
        teardown_delay_ms: 20,
        ..TrackerConfig::default()
    })
    .unwrap();
    let id = task_id("orphan");
    tracker.create(id.clone(), 10, None);
    let mut receiver = subscribe(&tracker, &id);
    tracker.complete(&id, None, None);

    drop(tracker);

    assert_eq!(
        next_frame(&mut receiver).await.unwrap().kind,
        FrameKind::Progress
    );
    assert_eq!(
        next_frame(&mut receiver).await.unwrap().kind,
        FrameKind::Completed
    );
    assert!(next_frame(&mut receiver).await.is_none());
}

#[tokio::test]
async fn dropping_tracker_closes_channels_of_running_tasks() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("abandoned");
    tracker.create(id.clone(), 10, None);
    let mut receiver = subscribe(&tracker, &id);
    let flaky = Arc::new(FlakySink::accepting(5));
    assert!(tracker.register_observer(&id, flaky.clone()));

    drop(tracker);

    assert!(next_frame(&mut receiver).await.is_some());
    assert!(next_frame(&mut receiver).await.is_none());
    assert_eq!(flaky.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn late_observer_of_finished_task_is_also_closed() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("already-done");
    tracker.create(id.clone(), 10, None);
    tracker.complete(&id, None, None);
    wait_until(|| tracker.pending_teardowns() == 0).await;

    let mut receiver = subscribe(&tracker, &id);

    assert_eq!(
        next_frame(&mut receiver).await.unwrap().kind,
        FrameKind::Completed
    );
    assert!(next_frame(&mut receiver).await.is_none());
}

#[tokio::test]
async fn dropped_receiver_is_marked_inactive_and_removed() {
    let tracker = ProgressTracker::new(fast_teardown_config()).unwrap();
    let id = task_id("walked-away");
    tracker.create(id.clone(), 10, None);
    let receiver = subscribe(&tracker, &id);
    assert_eq!(tracker.observer_count(&id), 1);

    drop(receiver);

    wait_until(|| tracker.observer_count(&id) == 0).await;
    assert!(tracker.observer_connections(&id).is_empty());
    tracker.update(&id, TaskPatch::new().current(1));
    assert_eq!(tracker.get_task(&id).unwrap().current, 1);
}

#[tokio::test]
async fn recreating_task_cancels_pending_teardown() {
    let tracker = ProgressTracker::new(TrackerConfig {
        teardown_delay_ms: 200,
        ..TrackerConfig::default()
    })
    .unwrap();
    let id = task_id("rerun");
    tracker.create(id.clone(), 10, None);
    let mut receiver = subscribe(&tracker, &id);
    next_frame(&mut receiver).await.unwrap();
    tracker.complete(&id, None, None);
    assert_eq!(tracker.pending_teardowns(), 1);

    tracker.create(id.clone(), 20, Some("second pass"));

    assert_eq!(tracker.pending_teardowns(), 0);
    assert_eq!(
        next_frame(&mut receiver).await.unwrap().kind,
        FrameKind::Completed
    );
    let restarted = next_frame(&mut receiver).await.unwrap();
    assert_eq!(restarted.kind, FrameKind::Progress);
    assert_eq!(restarted.task.total, 20);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tracker.observer_count(&id), 1);
}

#[tokio::test]
async fn shutdown_closes_channels_and_cancels_timers() {
    let tracker = ProgressTracker::new(TrackerConfig {
        teardown_delay_ms: 60_000,
        ..TrackerConfig::default()
    })
    .unwrap();
    let running = task_id("running");
    let finished = task_id("finished");
    tracker.create(running.clone(), 10, None);
    tracker.create(finished.clone(), 10, None);
    let mut running_rx = subscribe(&tracker, &running);
    let mut finished_rx = subscribe(&tracker, &finished);
    tracker.complete(&finished, None, None);
    tracker.spawn_sweeper().unwrap();
    assert!(tracker.is_sweeper_running());

    tracker.shutdown();

    assert_eq!(tracker.pending_teardowns(), 0);
    assert!(!tracker.is_sweeper_running());
    assert!(next_frame(&mut running_rx).await.is_some());
    assert!(next_frame(&mut running_rx).await.is_none());
    assert!(next_frame(&mut finished_rx).await.is_some());
    assert!(next_frame(&mut finished_rx).await.is_some());
    assert!(next_frame(&mut finished_rx).await.is_none());
    assert_eq!(tracker.list_tasks().len(), 2);
}
