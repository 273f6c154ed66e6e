//! The default outer task state graph.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::machine::{sync_hook, Transition};
use crate::task::{Task, TaskDescriptor, TaskHook};
use crate::types::message::ContentBlock;

use super::tree::TreeTask;

/// States of the default outer task machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, awaiting planning.
    Created,
    /// Being executed.
    Running,
    /// Completed successfully; terminal.
    Finished,
    /// Gave up; terminal.
    Canceled,
}

/// Events of the default outer task machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// Reset back to the created state for re-planning.
    Init,
    /// Planning finished; start (or retry) execution.
    Planed,
    /// Execution finished.
    Done,
    /// Give up.
    Cancel,
}

/// The default valid-state set.
pub fn base_states() -> HashSet<TaskState> {
    [
        TaskState::Created,
        TaskState::Running,
        TaskState::Finished,
        TaskState::Canceled,
    ]
    .into_iter()
    .collect()
}

/// The default transition table:
///
/// 1. `Created --Planed--> Running` (clears stale error info)
/// 2. `Running --Done--> Finished`
/// 3. `Running --Planed--> Running` (retry pass)
/// 4. `Running --Init--> Created` (re-plan after a canceled child)
/// 5. `Running --Cancel--> Canceled`
/// 6. `Created --Cancel--> Canceled`
pub fn base_transitions(
) -> HashMap<(TaskState, TaskEvent), Transition<TaskState, TaskHook<TaskState, TaskEvent>>> {
    let mut transitions = HashMap::new();

    transitions.insert(
        (TaskState::Created, TaskEvent::Planed),
        Transition::with_hook(
            TaskState::Running,
            sync_hook(|task: &mut Task<TaskState, TaskEvent>| {
                task.clean_error_info();
                info!(task = %task.id(), "planning finished, entering execution");
            }),
        ),
    );

    transitions.insert(
        (TaskState::Running, TaskEvent::Done),
        Transition::with_hook(
            TaskState::Finished,
            sync_hook(|task: &mut Task<TaskState, TaskEvent>| {
                info!(task = %task.id(), "execution finished");
            }),
        ),
    );

    transitions.insert(
        (TaskState::Running, TaskEvent::Planed),
        Transition::with_hook(
            TaskState::Running,
            sync_hook(|task: &mut Task<TaskState, TaskEvent>| {
                info!(task = %task.id(), "retrying execution");
            }),
        ),
    );

    transitions.insert(
        (TaskState::Running, TaskEvent::Init),
        Transition::with_hook(
            TaskState::Created,
            sync_hook(|task: &mut Task<TaskState, TaskEvent>| {
                info!(task = %task.id(), "returning to created for re-planning");
            }),
        ),
    );

    transitions.insert(
        (TaskState::Running, TaskEvent::Cancel),
        Transition::with_hook(
            TaskState::Canceled,
            sync_hook(|task: &mut Task<TaskState, TaskEvent>| {
                info!(task = %task.id(), "execution canceled");
            }),
        ),
    );

    transitions.insert(
        (TaskState::Created, TaskEvent::Cancel),
        Transition::with_hook(
            TaskState::Canceled,
            sync_hook(|task: &mut Task<TaskState, TaskEvent>| {
                info!(task = %task.id(), "canceled before execution");
            }),
        ),
    );

    transitions
}

const ROOT_PROTOCOL: &str = "A tree task carries a goal in its input, may be split into \
sub-tasks, and reports its result through its output blocks.";

/// Build a root tree task over the default state graph.
pub fn default_tree_task(max_depth: usize) -> crate::error::EngineResult<TreeTask<TaskState, TaskEvent>> {
    let task = Task::builder()
        .valid_states(base_states())
        .init_state(TaskState::Created)
        .transitions(base_transitions())
        .descriptor(
            TaskDescriptor::new("root_task")
                .with_protocol(vec![ContentBlock::text(ROOT_PROTOCOL)]),
        )
        .build()?;
    Ok(TreeTask::new(task, max_depth))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_base_graph_happy_path() {
        let mut tree = default_tree_task(5).unwrap();
        assert_eq!(tree.current_state(), TaskState::Created);
        tree.handle_event(TaskEvent::Planed).await.unwrap();
        tree.handle_event(TaskEvent::Done).await.unwrap();
        assert_eq!(tree.current_state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn test_planed_from_created_clears_error() {
        let mut tree = default_tree_task(5).unwrap();
        tree.task_mut().set_error("left over");
        tree.handle_event(TaskEvent::Planed).await.unwrap();
        assert!(!tree.is_error());
    }

    #[tokio::test]
    async fn test_cancel_paths() {
        let mut tree = default_tree_task(5).unwrap();
        tree.handle_event(TaskEvent::Cancel).await.unwrap();
        assert_eq!(tree.current_state(), TaskState::Canceled);

        let mut tree = default_tree_task(5).unwrap();
        tree.handle_event(TaskEvent::Planed).await.unwrap();
        tree.handle_event(TaskEvent::Cancel).await.unwrap();
        assert_eq!(tree.current_state(), TaskState::Canceled);
    }
}
