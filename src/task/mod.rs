//! Tasks: state machines enriched with input/output, per-state contexts,
//! error bookkeeping, and type-level metadata.

pub mod states;
pub mod tree;
pub mod view;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, HookHandle, State, StateMachine, Transition};
use crate::types::message::{ContentBlock, Message};
use crate::types::params::CompletionConfig;

pub use states::{base_states, base_transitions, default_tree_task, TaskEvent, TaskState};
pub use tree::{TreeTask, TreeTaskHandle};

/// Hook executed against a task after one of its transitions commits.
pub type TaskHook<S, E> = HookHandle<Task<S, E>>;

/// Type-level metadata shared by every instance of a task kind: its type
/// tag, the capability tags it grants, and the protocol describing it.
#[derive(Debug, Clone, Default)]
pub struct TaskDescriptor {
    /// Task kind tag, e.g. `"root_task"`.
    pub task_type: String,
    /// Capability tags; workflow tools check these against their
    /// required-tag sets.
    pub tags: HashSet<String>,
    /// Content blocks describing the task kind to a model.
    pub protocol: Vec<ContentBlock>,
}

impl TaskDescriptor {
    /// Create a descriptor for the given task type.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            tags: HashSet::new(),
            protocol: Vec::new(),
        }
    }

    /// Set the capability tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the protocol blocks.
    pub fn with_protocol(mut self, protocol: Vec<ContentBlock>) -> Self {
        self.protocol = protocol;
        self
    }
}

/// A unit of schedulable work: a compiled state machine carrying input,
/// output, error info, and one conversation [`Context`] per state.
///
/// # Example
///
/// ```rust
/// use tasktree::task::{Task, TaskDescriptor, TaskEvent, TaskState};
/// use tasktree::task::{base_states, base_transitions};
/// use tasktree::types::ContentBlock;
///
/// # tokio_test::block_on(async {
/// let mut task: Task<TaskState, TaskEvent> = Task::builder()
///     .valid_states(base_states())
///     .init_state(TaskState::Created)
///     .transitions(base_transitions())
///     .descriptor(TaskDescriptor::new("demo"))
///     .title("demo task")
///     .build()
///     .unwrap();
/// task.set_input(vec![ContentBlock::text("goal")]);
/// task.handle_event(TaskEvent::Planed).await.unwrap();
/// assert_eq!(task.current_state(), TaskState::Running);
/// # });
/// ```
pub struct Task<S: State, E: Event> {
    machine: StateMachine<S, E, TaskHook<S, E>>,
    title: String,
    descriptor: TaskDescriptor,
    unique_protocol: Vec<ContentBlock>,
    input: Vec<ContentBlock>,
    output: Vec<ContentBlock>,
    completed: bool,
    error_info: Option<String>,
    contexts: HashMap<S, Context>,
    completion_config: CompletionConfig,
    max_revisit_limit: i32,
}

impl<S: State, E: Event> Task<S, E> {
    /// Start a builder.
    pub fn builder() -> TaskBuilder<S, E> {
        TaskBuilder::default()
    }

    /// Stable per-instance identifier.
    pub fn id(&self) -> &str {
        self.machine.id()
    }

    /// Task title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Set the task title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    // ---------- state machine ----------

    /// Current state of the outer machine.
    pub fn current_state(&self) -> S {
        self.machine.current_state()
    }

    /// Copy of the valid-state set.
    pub fn valid_states(&self) -> HashSet<S> {
        self.machine.valid_states()
    }

    /// Copy of the transition table as `(from, event) -> to`.
    pub fn transition_targets(&self) -> HashMap<(S, E), S> {
        self.machine.transition_targets()
    }

    /// Whether the underlying machine compiled.
    pub fn is_compiled(&self) -> bool {
        self.machine.is_compiled()
    }

    /// How many times `state` has been entered.
    pub fn visit_count(&self, state: S) -> u32 {
        self.machine.visit_count(state)
    }

    /// Copy of all visit counters.
    pub fn visit_counts(&self) -> HashMap<S, u32> {
        self.machine.visit_counts()
    }

    /// Apply an event and await the transition hook, if any.
    pub async fn handle_event(&mut self, event: E) -> EngineResult<()> {
        let (_, _, hook) = self.machine.apply(event)?;
        if let Some(hook) = hook {
            hook.run(self).await;
        }
        Ok(())
    }

    /// Return the machine to its initial state and drop every per-state
    /// context. Input, output, title, protocol, and the revisit limit are
    /// preserved. Error info is NOT cleared here: retry callbacks inspect
    /// it and call [`clean_error_info`](Self::clean_error_info) themselves.
    pub fn reset(&mut self) {
        self.machine.reset();
        self.contexts.clear();
        debug!(task = %self.id(), "task reset");
    }

    // ---------- input / output ----------

    /// Task input blocks.
    pub fn input(&self) -> &[ContentBlock] {
        &self.input
    }

    /// Replace the task input.
    pub fn set_input(&mut self, input: Vec<ContentBlock>) {
        self.input = input;
    }

    /// Task output blocks; authoritative once the task finished.
    pub fn output(&self) -> &[ContentBlock] {
        &self.output
    }

    /// Record the output and mark the task completed. This only records
    /// state; driving the machine into a terminal state is the caller's
    /// (usually the scheduler's) job.
    pub fn set_completed(&mut self, output: Vec<ContentBlock>) {
        self.output = output;
        self.completed = true;
    }

    /// Whether output has been recorded.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    // ---------- error bookkeeping ----------

    /// Whether error info is set.
    pub fn is_error(&self) -> bool {
        self.error_info.is_some()
    }

    /// The recorded error info, if any.
    pub fn error_info(&self) -> Option<&str> {
        self.error_info.as_deref()
    }

    /// Record error info, replacing any previous value.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_info = Some(message.into());
    }

    /// Clear the recorded error info.
    pub fn clean_error_info(&mut self) {
        self.error_info = None;
    }

    // ---------- contexts ----------

    /// Context of the current state, if one exists yet.
    pub fn context(&self) -> Option<&Context> {
        self.contexts.get(&self.machine.current_state())
    }

    /// Context of the current state, created on first use.
    pub fn context_mut(&mut self) -> &mut Context {
        self.contexts
            .entry(self.machine.current_state())
            .or_default()
    }

    /// Cloned message history of the current state's context.
    pub fn context_messages(&self) -> Vec<Message> {
        self.context().map(Context::to_messages).unwrap_or_default()
    }

    /// The full per-state context map.
    pub fn contexts(&self) -> &HashMap<S, Context> {
        &self.contexts
    }

    /// Append a message to the current state's context, upholding the
    /// role-ordering invariant.
    pub fn append_context(&mut self, message: Message) -> EngineResult<()> {
        self.context_mut().append(message)
    }

    // ---------- metadata ----------

    /// Type-level metadata.
    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// Task type tag.
    pub fn task_type(&self) -> &str {
        &self.descriptor.task_type
    }

    /// Capability tags.
    pub fn tags(&self) -> &HashSet<String> {
        &self.descriptor.tags
    }

    /// Type-level protocol blocks.
    pub fn protocol(&self) -> &[ContentBlock] {
        &self.descriptor.protocol
    }

    /// Per-instance protocol blocks.
    pub fn unique_protocol(&self) -> &[ContentBlock] {
        &self.unique_protocol
    }

    /// Replace the per-instance protocol.
    pub fn set_unique_protocol(&mut self, protocol: Vec<ContentBlock>) {
        self.unique_protocol = protocol;
    }

    /// Completion parameters attached to the task.
    pub fn completion_config(&self) -> &CompletionConfig {
        &self.completion_config
    }

    /// Mutable completion parameters.
    pub fn completion_config_mut(&mut self) -> &mut CompletionConfig {
        &mut self.completion_config
    }

    /// Revisit limit installed by the scheduler before driving the task.
    pub fn max_revisit_limit(&self) -> i32 {
        self.max_revisit_limit
    }

    /// Install the revisit limit.
    pub fn set_max_revisit_limit(&mut self, limit: i32) {
        self.max_revisit_limit = limit;
    }
}

/// Builder for [`Task`].
pub struct TaskBuilder<S: State, E: Event> {
    valid_states: HashSet<S>,
    init_state: Option<S>,
    transitions: HashMap<(S, E), Transition<S, TaskHook<S, E>>>,
    descriptor: TaskDescriptor,
    title: String,
    unique_protocol: Vec<ContentBlock>,
    completion_config: CompletionConfig,
    max_revisit_limit: i32,
}

impl<S: State, E: Event> Default for TaskBuilder<S, E> {
    fn default() -> Self {
        Self {
            valid_states: HashSet::new(),
            init_state: None,
            transitions: HashMap::new(),
            descriptor: TaskDescriptor::default(),
            title: String::new(),
            unique_protocol: Vec::new(),
            completion_config: CompletionConfig::default(),
            max_revisit_limit: 0,
        }
    }
}

impl<S: State, E: Event> TaskBuilder<S, E> {
    /// Set the valid-state set.
    pub fn valid_states(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.valid_states = states.into_iter().collect();
        self
    }

    /// Set the initial state.
    pub fn init_state(mut self, state: S) -> Self {
        self.init_state = Some(state);
        self
    }

    /// Replace the whole transition table.
    pub fn transitions(
        mut self,
        transitions: HashMap<(S, E), Transition<S, TaskHook<S, E>>>,
    ) -> Self {
        self.transitions = transitions;
        self
    }

    /// Add a hook-less transition.
    pub fn transition(mut self, from: S, event: E, to: S) -> Self {
        self.transitions.insert((from, event), Transition::to(to));
        self
    }

    /// Add a transition with a hook.
    pub fn transition_with(mut self, from: S, event: E, to: S, hook: TaskHook<S, E>) -> Self {
        self.transitions
            .insert((from, event), Transition::with_hook(to, hook));
        self
    }

    /// Set the type-level metadata.
    pub fn descriptor(mut self, descriptor: TaskDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Set the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the per-instance protocol.
    pub fn unique_protocol(mut self, protocol: Vec<ContentBlock>) -> Self {
        self.unique_protocol = protocol;
        self
    }

    /// Set the completion parameters.
    pub fn completion_config(mut self, config: CompletionConfig) -> Self {
        self.completion_config = config;
        self
    }

    /// Set the initial revisit limit.
    pub fn max_revisit_limit(mut self, limit: i32) -> Self {
        self.max_revisit_limit = limit;
        self
    }

    /// Build and compile the task.
    pub fn build(self) -> EngineResult<Task<S, E>> {
        let init_state = self
            .init_state
            .ok_or_else(|| EngineError::configuration("task init state is required"))?;
        let machine = StateMachine::new("task", self.valid_states, init_state, self.transitions)?;
        Ok(Task {
            machine,
            title: self.title,
            descriptor: self.descriptor,
            unique_protocol: self.unique_protocol,
            input: Vec::new(),
            output: Vec::new(),
            completed: false,
            error_info: None,
            contexts: HashMap::new(),
            completion_config: self.completion_config,
            max_revisit_limit: self.max_revisit_limit,
        })
    }
}
