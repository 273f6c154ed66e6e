//! Tree-structured task nodes.
//!
//! A [`TreeTask`] owns its children exclusively through
//! [`TreeTaskHandle`]s; the parent pointer is a non-owning [`Weak`]
//! back-reference. Parentage changes only through
//! [`TreeTask::add_sub_task`], [`TreeTask::pop_sub_task`], and
//! [`TreeTask::set_parent`], which keep both directions of the link and the
//! depth counters consistent. Depth checks happen before any mutation, so a
//! rejected attach leaves both trees untouched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, State};
use crate::types::message::{ContentBlock, Message};
use crate::types::params::CompletionConfig;

use super::{Task, TaskDescriptor};

/// Shared handle to a tree task node.
pub type TreeTaskHandle<S, E> = Arc<Mutex<TreeTask<S, E>>>;

/// A task with tree structure: ordered sub-tasks, a parent back-reference,
/// and a depth bound.
pub struct TreeTask<S: State, E: Event> {
    task: Task<S, E>,
    parent: Option<Weak<Mutex<TreeTask<S, E>>>>,
    sub_tasks: Vec<TreeTaskHandle<S, E>>,
    current_depth: usize,
    max_depth: usize,
}

impl<S: State, E: Event> TreeTask<S, E> {
    /// Wrap a task as a root node with the given depth bound.
    pub fn new(task: Task<S, E>, max_depth: usize) -> Self {
        Self {
            task,
            parent: None,
            sub_tasks: Vec::new(),
            current_depth: 0,
            max_depth,
        }
    }

    /// Move the node into a shared handle.
    pub fn into_handle(self) -> TreeTaskHandle<S, E> {
        Arc::new(Mutex::new(self))
    }

    /// Build a handle and attach `sub_tasks` in order, establishing the
    /// bidirectional links the same way [`add_sub_task`](Self::add_sub_task)
    /// does.
    pub async fn with_sub_tasks(
        task: Task<S, E>,
        max_depth: usize,
        sub_tasks: Vec<TreeTaskHandle<S, E>>,
    ) -> EngineResult<TreeTaskHandle<S, E>> {
        let handle = Self::new(task, max_depth).into_handle();
        for sub_task in sub_tasks {
            Self::add_sub_task(&handle, sub_task).await?;
        }
        Ok(handle)
    }

    // ---------- tree structure ----------

    /// Whether this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.sub_tasks.is_empty()
    }

    /// Depth of this node; 0 for roots.
    pub fn current_depth(&self) -> usize {
        self.current_depth
    }

    /// Maximum depth any node of this subtree may sit at.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Upgrade the parent back-reference, if the parent is still alive.
    pub fn parent(&self) -> Option<TreeTaskHandle<S, E>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The children, in insertion order.
    pub fn sub_tasks(&self) -> Vec<TreeTaskHandle<S, E>> {
        self.sub_tasks.clone()
    }

    /// Append `child` to `parent`'s children. The child's depth becomes
    /// `parent.depth + 1` and its whole subtree is re-depthed. Fails with
    /// [`EngineError::DepthExceeded`] - before any mutation - when a node
    /// of the subtree would land past its own or the parent's depth bound.
    pub async fn add_sub_task(
        parent: &TreeTaskHandle<S, E>,
        child: TreeTaskHandle<S, E>,
    ) -> EngineResult<()> {
        let (child_depth, parent_max) = {
            let guard = parent.lock().await;
            (guard.current_depth + 1, guard.max_depth)
        };
        if child_depth > parent_max {
            return Err(EngineError::DepthExceeded {
                depth: child_depth,
                max: parent_max,
            });
        }
        check_subtree_depth(child.clone(), child_depth).await?;
        assign_subtree_depth(child.clone(), child_depth).await;
        {
            let mut guard = child.lock().await;
            guard.parent = Some(Arc::downgrade(parent));
        }
        parent.lock().await.sub_tasks.push(child);
        Ok(())
    }

    /// Remove `child` from `parent`'s children by identity. The child
    /// becomes a root again (no parent, depth 0). Returns whether the
    /// child was found.
    pub async fn pop_sub_task(
        parent: &TreeTaskHandle<S, E>,
        child: &TreeTaskHandle<S, E>,
    ) -> bool {
        let found = {
            let mut guard = parent.lock().await;
            match guard
                .sub_tasks
                .iter()
                .position(|existing| Arc::ptr_eq(existing, child))
            {
                Some(index) => {
                    guard.sub_tasks.remove(index);
                    true
                }
                None => false,
            }
        };
        if found {
            child.lock().await.parent = None;
            assign_subtree_depth(child.clone(), 0).await;
        }
        found
    }

    /// Re-home `child` under `parent`, detaching it from its current
    /// parent first. Passing `None` just detaches.
    pub async fn set_parent(
        child: &TreeTaskHandle<S, E>,
        parent: Option<&TreeTaskHandle<S, E>>,
    ) -> EngineResult<()> {
        let old_parent = { child.lock().await.parent() };
        if let Some(old_parent) = old_parent {
            Self::pop_sub_task(&old_parent, child).await;
        }
        if let Some(parent) = parent {
            Self::add_sub_task(parent, child.clone()).await?;
        }
        Ok(())
    }

    /// Collect the subtree rooted here in pre-order (insertion order among
    /// siblings).
    pub async fn collect_subtree(handle: &TreeTaskHandle<S, E>) -> Vec<TreeTaskHandle<S, E>> {
        let mut out = Vec::new();
        let mut stack = vec![handle.clone()];
        while let Some(node) = stack.pop() {
            let children = { node.lock().await.sub_tasks() };
            out.push(node);
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    // ---------- task delegation ----------

    /// The wrapped task.
    pub fn task(&self) -> &Task<S, E> {
        &self.task
    }

    /// The wrapped task, mutably.
    pub fn task_mut(&mut self) -> &mut Task<S, E> {
        &mut self.task
    }

    /// See [`Task::id`].
    pub fn id(&self) -> &str {
        self.task.id()
    }

    /// See [`Task::title`].
    pub fn title(&self) -> &str {
        self.task.title()
    }

    /// See [`Task::set_title`].
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.task.set_title(title);
    }

    /// See [`Task::current_state`].
    pub fn current_state(&self) -> S {
        self.task.current_state()
    }

    /// See [`Task::valid_states`].
    pub fn valid_states(&self) -> HashSet<S> {
        self.task.valid_states()
    }

    /// See [`Task::visit_count`].
    pub fn visit_count(&self, state: S) -> u32 {
        self.task.visit_count(state)
    }

    /// See [`Task::visit_counts`].
    pub fn visit_counts(&self) -> HashMap<S, u32> {
        self.task.visit_counts()
    }

    /// See [`Task::handle_event`].
    pub async fn handle_event(&mut self, event: E) -> EngineResult<()> {
        self.task.handle_event(event).await
    }

    /// See [`Task::reset`]. Children are left attached; detaching doomed
    /// children is the scheduler callback's decision.
    pub fn reset(&mut self) {
        self.task.reset();
    }

    /// See [`Task::input`].
    pub fn input(&self) -> &[ContentBlock] {
        self.task.input()
    }

    /// See [`Task::set_input`].
    pub fn set_input(&mut self, input: Vec<ContentBlock>) {
        self.task.set_input(input);
    }

    /// See [`Task::output`].
    pub fn output(&self) -> &[ContentBlock] {
        self.task.output()
    }

    /// See [`Task::set_completed`].
    pub fn set_completed(&mut self, output: Vec<ContentBlock>) {
        self.task.set_completed(output);
    }

    /// See [`Task::is_completed`].
    pub fn is_completed(&self) -> bool {
        self.task.is_completed()
    }

    /// See [`Task::is_error`].
    pub fn is_error(&self) -> bool {
        self.task.is_error()
    }

    /// See [`Task::error_info`].
    pub fn error_info(&self) -> Option<&str> {
        self.task.error_info()
    }

    /// See [`Task::set_error`].
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.task.set_error(message);
    }

    /// See [`Task::clean_error_info`].
    pub fn clean_error_info(&mut self) {
        self.task.clean_error_info();
    }

    /// See [`Task::append_context`].
    pub fn append_context(&mut self, message: Message) -> EngineResult<()> {
        self.task.append_context(message)
    }

    /// See [`Task::context`].
    pub fn context(&self) -> Option<&Context> {
        self.task.context()
    }

    /// See [`Task::context_messages`].
    pub fn context_messages(&self) -> Vec<Message> {
        self.task.context_messages()
    }

    /// See [`Task::descriptor`].
    pub fn descriptor(&self) -> &TaskDescriptor {
        self.task.descriptor()
    }

    /// See [`Task::tags`].
    pub fn tags(&self) -> HashSet<String> {
        self.task.tags().clone()
    }

    /// See [`Task::completion_config`].
    pub fn completion_config(&self) -> &CompletionConfig {
        self.task.completion_config()
    }

    /// See [`Task::set_max_revisit_limit`].
    pub fn set_max_revisit_limit(&mut self, limit: i32) {
        self.task.set_max_revisit_limit(limit);
    }

    /// See [`Task::max_revisit_limit`].
    pub fn max_revisit_limit(&self) -> i32 {
        self.task.max_revisit_limit()
    }
}

/// Verify that re-rooting the subtree at `depth` keeps every node within
/// its own depth bound. Read-only.
fn check_subtree_depth<S: State, E: Event>(
    handle: TreeTaskHandle<S, E>,
    depth: usize,
) -> BoxFuture<'static, EngineResult<()>> {
    async move {
        let children = {
            let guard = handle.lock().await;
            if depth > guard.max_depth {
                return Err(EngineError::DepthExceeded {
                    depth,
                    max: guard.max_depth,
                });
            }
            guard.sub_tasks()
        };
        for child in children {
            check_subtree_depth(child, depth + 1).await?;
        }
        Ok(())
    }
    .boxed()
}

/// Set the node's depth to `depth` and re-depth its whole subtree.
fn assign_subtree_depth<S: State, E: Event>(
    handle: TreeTaskHandle<S, E>,
    depth: usize,
) -> BoxFuture<'static, ()> {
    async move {
        let children = {
            let mut guard = handle.lock().await;
            guard.current_depth = depth;
            guard.sub_tasks()
        };
        for child in children {
            assign_subtree_depth(child, depth + 1).await;
        }
    }
    .boxed()
}
