//! Cross-cutting state machine behavior: role ordering, reset replay,
//! and default-graph boundaries.

mod common;

use common::titled_task;
use tasktree::error::EngineError;
use tasktree::task::{TaskEvent, TaskState};
use tasktree::types::{Message, Role};

#[tokio::test]
async fn test_role_ordering_rejection_in_task_context() {
    let task = titled_task("ordering");
    let mut guard = task.lock().await;
    guard.append_context(Message::user("u").build()).unwrap();
    guard
        .append_context(Message::assistant("a").build())
        .unwrap();
    let err = guard
        .append_context(Message::system("late system").build())
        .unwrap_err();
    assert!(matches!(err, EngineError::ContextOrderViolation(_)));

    let messages = guard.context_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_unknown_transition_keeps_task_intact() {
    let task = titled_task("unknown-event");
    let mut guard = task.lock().await;
    // Done is not valid while Created
    let err = guard.handle_event(TaskEvent::Done).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownTransition { .. }));
    assert_eq!(guard.current_state(), TaskState::Created);
    assert_eq!(guard.visit_count(TaskState::Created), 1);
    assert_eq!(guard.visit_count(TaskState::Running), 0);
}

#[tokio::test]
async fn test_reset_then_replay_reaches_the_same_state() {
    let task = titled_task("replay");
    let mut guard = task.lock().await;

    let script = [TaskEvent::Planed, TaskEvent::Planed, TaskEvent::Done];
    for event in script {
        guard.handle_event(event).await.unwrap();
    }
    let first_run = (guard.current_state(), guard.visit_counts());

    guard.reset();
    assert_eq!(guard.current_state(), TaskState::Created);
    for event in script {
        guard.handle_event(event).await.unwrap();
    }
    assert_eq!((guard.current_state(), guard.visit_counts()), first_run);
}

#[tokio::test]
async fn test_default_graph_retry_loop_counts_visits() {
    let task = titled_task("visits");
    let mut guard = task.lock().await;
    guard.handle_event(TaskEvent::Planed).await.unwrap();
    guard.handle_event(TaskEvent::Planed).await.unwrap();
    guard.handle_event(TaskEvent::Planed).await.unwrap();
    assert_eq!(guard.current_state(), TaskState::Running);
    assert_eq!(guard.visit_count(TaskState::Running), 3);
    guard.handle_event(TaskEvent::Cancel).await.unwrap();
    assert_eq!(guard.current_state(), TaskState::Canceled);
}
