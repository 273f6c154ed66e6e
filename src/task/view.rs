//! Textual views over tasks, used by the default observe functions.

use crate::machine::{Event, State};
use crate::types::message::blocks_text;

use super::tree::{TreeTask, TreeTaskHandle};
use super::Task;

/// Render a task as a requirement statement: title, input, and the
/// per-instance protocol when present.
pub fn requirement_view<S: State, E: Event>(task: &Task<S, E>) -> String {
    let mut out = String::new();
    if !task.title().is_empty() {
        out.push_str("# Task: ");
        out.push_str(task.title());
        out.push('\n');
    }
    let input = blocks_text(task.input());
    if !input.is_empty() {
        out.push_str("## Requirement\n");
        out.push_str(&input);
        out.push('\n');
    }
    let protocol = blocks_text(task.unique_protocol());
    if !protocol.is_empty() {
        out.push_str("## Protocol\n");
        out.push_str(&protocol);
        out.push('\n');
    }
    out
}

/// Render the type-level contract of a task: its type tag and protocol.
pub fn protocol_view<S: State, E: Event>(task: &Task<S, E>) -> String {
    let mut out = String::new();
    out.push_str("type: ");
    out.push_str(task.task_type());
    out.push('\n');
    let protocol = blocks_text(task.protocol());
    if !protocol.is_empty() {
        out.push_str(&protocol);
        out.push('\n');
    }
    out
}

/// Render the subtree as an indented todo list of titles and states.
pub async fn tree_outline<S: State, E: Event>(root: &TreeTaskHandle<S, E>) -> String {
    let mut out = String::new();
    let nodes = TreeTask::collect_subtree(root).await;
    for node in nodes {
        let guard = node.lock().await;
        let indent = "  ".repeat(guard.current_depth());
        out.push_str(&format!(
            "{indent}- [{:?}] {}\n",
            guard.current_state(),
            if guard.title().is_empty() {
                guard.id()
            } else {
                guard.title()
            }
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::states::{base_states, base_transitions, TaskEvent, TaskState};
    use crate::task::TaskDescriptor;
    use crate::types::message::ContentBlock;

    fn task() -> Task<TaskState, TaskEvent> {
        let mut task = Task::builder()
            .valid_states(base_states())
            .init_state(TaskState::Created)
            .transitions(base_transitions())
            .descriptor(TaskDescriptor::new("demo"))
            .title("write summary")
            .build()
            .unwrap();
        task.set_input(vec![ContentBlock::text("summarize the report")]);
        task
    }

    #[test]
    fn test_requirement_view_includes_title_and_input() {
        let view = requirement_view(&task());
        assert!(view.contains("write summary"));
        assert!(view.contains("summarize the report"));
    }

    #[test]
    fn test_protocol_view_names_type() {
        let view = protocol_view(&task());
        assert!(view.contains("type: demo"));
    }

    #[tokio::test]
    async fn test_tree_outline_indents_children() {
        let root = TreeTask::new(task(), 3).into_handle();
        let child = TreeTask::new(task(), 3).into_handle();
        child.lock().await.set_title("child step");
        TreeTask::add_sub_task(&root, child).await.unwrap();

        let outline = tree_outline(&root).await;
        assert!(outline.contains("- [Created] write summary"));
        assert!(outline.contains("  - [Created] child step"));
    }
}
