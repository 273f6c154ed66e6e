//! The inner workflow machine an agent executes during a task's RUNNING
//! phase.
//!
//! A workflow is a state machine over *stages* and *stage events* that
//! additionally carries everything an agent needs per stage: the prompt,
//! the observe function, the action body, the completion parameters, the
//! language model, plus a static registry of workflow-local tools. The
//! event chain drives the agent's round loop: its first event restarts a
//! round, its last event terminates the run.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, HookHandle, State, StateMachine, Transition};
use crate::ports::LanguageModel;
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;
use crate::task::Task;
use crate::types::message::Message;
use crate::types::params::CompletionConfig;
use crate::types::tools::{ToolDescriptor, ToolOutput};

/// Shared handle to a per-run workflow instance.
pub type WorkflowHandle<St, Ev, S, E> = Arc<Mutex<Workflow<St, Ev, S, E>>>;

/// Hook executed against the workflow after one of its transitions.
pub type WorkflowHook<St, Ev, S, E> = HookHandle<Workflow<St, Ev, S, E>>;

/// Per-stage observe function: renders the task into a message appended to
/// the task context before thinking.
pub type ObserveFn<S, E> = Arc<dyn Fn(&Task<S, E>) -> Message + Send + Sync>;

/// The body of a stage: produces the next stage event.
pub type StageAction<St, Ev, S, E> = Arc<
    dyn Fn(
            Arc<Agent<St, Ev, S, E>>,
            WorkflowHandle<St, Ev, S, E>,
            RunContext,
            MessageQueue,
            TreeTaskHandle<S, E>,
        ) -> BoxFuture<'static, EngineResult<Ev>>
        + Send
        + Sync,
>;

/// Executable body of a workflow-local tool. Receives the task handle, the
/// structured arguments, and caller-injected extras.
pub type ToolHandler<S, E> = Arc<
    dyn Fn(
            TreeTaskHandle<S, E>,
            serde_json::Value,
            serde_json::Value,
        ) -> BoxFuture<'static, EngineResult<ToolOutput>>
        + Send
        + Sync,
>;

/// A tool registered on the workflow itself, bypassing the tool service.
#[derive(Clone)]
pub struct WorkflowTool<S: State, E: Event> {
    /// Descriptor advertised to the model.
    pub descriptor: ToolDescriptor,
    /// Tags a task must carry to invoke this tool.
    pub required_tags: std::collections::HashSet<String>,
    handler: ToolHandler<S, E>,
}

impl<S: State, E: Event> WorkflowTool<S, E> {
    /// Create a tool from its descriptor and handler.
    pub fn new(descriptor: ToolDescriptor, handler: ToolHandler<S, E>) -> Self {
        Self {
            descriptor,
            required_tags: std::collections::HashSet::new(),
            handler,
        }
    }

    /// Require the given task tags.
    pub fn with_required_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.required_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Execute the handler, converting handler failures into error
    /// outputs the way a tool server would.
    pub async fn invoke(
        &self,
        task: TreeTaskHandle<S, E>,
        arguments: serde_json::Value,
        inject: serde_json::Value,
    ) -> ToolOutput {
        match (self.handler)(task, arguments, inject).await {
            Ok(output) => output,
            Err(err) => ToolOutput::error(err.to_string()),
        }
    }
}

/// A per-run workflow instance.
pub struct Workflow<St: State, Ev: Event, S: State, E: Event> {
    machine: StateMachine<St, Ev, WorkflowHook<St, Ev, S, E>>,
    name: String,
    event_chain: Vec<Ev>,
    prompts: HashMap<St, String>,
    observe_fns: HashMap<St, ObserveFn<S, E>>,
    actions: HashMap<St, StageAction<St, Ev, S, E>>,
    completion_configs: HashMap<St, CompletionConfig>,
    llms: HashMap<St, Arc<dyn LanguageModel>>,
    tools: HashMap<String, WorkflowTool<S, E>>,
}

impl<St: State, Ev: Event, S: State, E: Event> Workflow<St, Ev, S, E> {
    /// Start a builder.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder<St, Ev, S, E> {
        WorkflowBuilder::new(name)
    }

    /// Workflow name (shared by every instance the factory produces).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable per-instance identifier.
    pub fn id(&self) -> &str {
        self.machine.id()
    }

    /// Current stage.
    pub fn current_stage(&self) -> St {
        self.machine.current_state()
    }

    /// How many times `stage` has been entered.
    pub fn visit_count(&self, stage: St) -> u32 {
        self.machine.visit_count(stage)
    }

    /// The event chain driving the agent's round loop.
    pub fn event_chain(&self) -> &[Ev] {
        &self.event_chain
    }

    /// Apply a stage event and await its transition hook.
    pub async fn handle_event(&mut self, event: Ev) -> EngineResult<()> {
        let (_, _, hook) = self.machine.apply(event)?;
        if let Some(hook) = hook {
            hook.run(self).await;
        }
        Ok(())
    }

    /// Return to the initial stage.
    pub fn reset(&mut self) {
        self.machine.reset();
    }

    /// Prompt of the current stage.
    pub fn prompt(&self) -> Option<&str> {
        self.prompts
            .get(&self.current_stage())
            .map(String::as_str)
    }

    /// All per-stage prompts.
    pub fn prompts(&self) -> &HashMap<St, String> {
        &self.prompts
    }

    /// Observe function of the current stage.
    pub fn observe_fn(&self) -> Option<ObserveFn<S, E>> {
        self.observe_fns.get(&self.current_stage()).cloned()
    }

    /// All per-stage observe functions.
    pub fn observe_fns(&self) -> &HashMap<St, ObserveFn<S, E>> {
        &self.observe_fns
    }

    /// Action of the current stage; every non-terminal stage must have one.
    pub fn action(&self) -> EngineResult<StageAction<St, Ev, S, E>> {
        self.actions
            .get(&self.current_stage())
            .cloned()
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "no action registered for stage {:?}",
                    self.current_stage()
                ))
            })
    }

    /// Completion parameters of the current stage (defaults when unset).
    pub fn completion_config(&self) -> CompletionConfig {
        self.completion_configs
            .get(&self.current_stage())
            .cloned()
            .unwrap_or_default()
    }

    /// All per-stage completion parameters.
    pub fn completion_configs(&self) -> &HashMap<St, CompletionConfig> {
        &self.completion_configs
    }

    /// Language model of the current stage.
    pub fn llm(&self) -> EngineResult<Arc<dyn LanguageModel>> {
        self.llms
            .get(&self.current_stage())
            .cloned()
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "no language model registered for stage {:?}",
                    self.current_stage()
                ))
            })
    }

    /// The workflow-local tool registry.
    pub fn tools(&self) -> &HashMap<String, WorkflowTool<S, E>> {
        &self.tools
    }

    /// Look up a workflow-local tool.
    pub fn tool(&self, name: &str) -> Option<WorkflowTool<S, E>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors of every workflow-local tool.
    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| tool.descriptor.clone())
            .collect()
    }

    /// Execute a workflow-local tool with structured arguments, injecting
    /// the task handle and caller extras into the handler.
    pub async fn call_tool(
        &self,
        name: &str,
        task: TreeTaskHandle<S, E>,
        inject: serde_json::Value,
        arguments: serde_json::Value,
    ) -> EngineResult<ToolOutput> {
        let tool = self
            .tool(name)
            .ok_or_else(|| EngineError::tool_not_found(name))?;
        Ok(tool.invoke(task, arguments, inject).await)
    }
}

/// Builder for [`Workflow`]. Tool registration is static: after
/// [`build`](Self::build) the registry never changes.
pub struct WorkflowBuilder<St: State, Ev: Event, S: State, E: Event> {
    name: String,
    valid_stages: Vec<St>,
    init_stage: Option<St>,
    transitions: HashMap<(St, Ev), Transition<St, WorkflowHook<St, Ev, S, E>>>,
    event_chain: Vec<Ev>,
    prompts: HashMap<St, String>,
    observe_fns: HashMap<St, ObserveFn<S, E>>,
    actions: HashMap<St, StageAction<St, Ev, S, E>>,
    completion_configs: HashMap<St, CompletionConfig>,
    llms: HashMap<St, Arc<dyn LanguageModel>>,
    tools: HashMap<String, WorkflowTool<S, E>>,
}

impl<St: State, Ev: Event, S: State, E: Event> WorkflowBuilder<St, Ev, S, E> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            valid_stages: Vec::new(),
            init_stage: None,
            transitions: HashMap::new(),
            event_chain: Vec::new(),
            prompts: HashMap::new(),
            observe_fns: HashMap::new(),
            actions: HashMap::new(),
            completion_configs: HashMap::new(),
            llms: HashMap::new(),
            tools: HashMap::new(),
        }
    }

    /// Declare the valid stages.
    pub fn valid_stages(mut self, stages: impl IntoIterator<Item = St>) -> Self {
        self.valid_stages = stages.into_iter().collect();
        self
    }

    /// Set the initial stage.
    pub fn init_stage(mut self, stage: St) -> Self {
        self.init_stage = Some(stage);
        self
    }

    /// Add a hook-less transition.
    pub fn transition(mut self, from: St, event: Ev, to: St) -> Self {
        self.transitions.insert((from, event), Transition::to(to));
        self
    }

    /// Add a transition with a hook.
    pub fn transition_with(
        mut self,
        from: St,
        event: Ev,
        to: St,
        hook: WorkflowHook<St, Ev, S, E>,
    ) -> Self {
        self.transitions
            .insert((from, event), Transition::with_hook(to, hook));
        self
    }

    /// Set the event chain. The first event restarts a round; the last
    /// event terminates the agent loop.
    pub fn event_chain(mut self, chain: impl IntoIterator<Item = Ev>) -> Self {
        self.event_chain = chain.into_iter().collect();
        self
    }

    /// Set a stage prompt.
    pub fn prompt(mut self, stage: St, prompt: impl Into<String>) -> Self {
        self.prompts.insert(stage, prompt.into());
        self
    }

    /// Set a stage observe function.
    pub fn observe_fn(mut self, stage: St, observe_fn: ObserveFn<S, E>) -> Self {
        self.observe_fns.insert(stage, observe_fn);
        self
    }

    /// Set a stage action.
    pub fn action(mut self, stage: St, action: StageAction<St, Ev, S, E>) -> Self {
        self.actions.insert(stage, action);
        self
    }

    /// Set stage completion parameters.
    pub fn completion_config(mut self, stage: St, config: CompletionConfig) -> Self {
        self.completion_configs.insert(stage, config);
        self
    }

    /// Set the stage language model.
    pub fn llm(mut self, stage: St, llm: Arc<dyn LanguageModel>) -> Self {
        self.llms.insert(stage, llm);
        self
    }

    /// Register a workflow-local tool.
    pub fn tool(mut self, tool: WorkflowTool<S, E>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Build and compile the workflow.
    pub fn build(self) -> EngineResult<Workflow<St, Ev, S, E>> {
        let init_stage = self
            .init_stage
            .ok_or_else(|| EngineError::configuration("workflow init stage is required"))?;
        if self.event_chain.is_empty() {
            return Err(EngineError::configuration(
                "workflow event chain must not be empty",
            ));
        }
        let machine = StateMachine::new(
            "workflow",
            self.valid_stages.into_iter().collect(),
            init_stage,
            self.transitions,
        )?;
        Ok(Workflow {
            machine,
            name: self.name,
            event_chain: self.event_chain,
            prompts: self.prompts,
            observe_fns: self.observe_fns,
            actions: self.actions,
            completion_configs: self.completion_configs,
            llms: self.llms,
            tools: self.tools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::states::{TaskEvent, TaskState};
    use crate::types::message::ContentBlock;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Stage {
        Working,
        Done,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum StageEvent {
        Work,
        Finish,
    }

    fn workflow() -> Workflow<Stage, StageEvent, TaskState, TaskEvent> {
        Workflow::builder("test")
            .valid_stages([Stage::Working, Stage::Done])
            .init_stage(Stage::Working)
            .transition(Stage::Working, StageEvent::Work, Stage::Working)
            .transition(Stage::Working, StageEvent::Finish, Stage::Done)
            .event_chain([StageEvent::Work, StageEvent::Finish])
            .prompt(Stage::Working, "do the thing")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_chain_and_stage_accessors() {
        let mut workflow = workflow();
        assert_eq!(
            workflow.event_chain(),
            &[StageEvent::Work, StageEvent::Finish]
        );
        assert_eq!(workflow.prompt(), Some("do the thing"));
        workflow.handle_event(StageEvent::Finish).await.unwrap();
        assert_eq!(workflow.current_stage(), Stage::Done);
        assert_eq!(workflow.prompt(), None);
    }

    #[test]
    fn test_builder_requires_event_chain() {
        let result = Workflow::<Stage, StageEvent, TaskState, TaskEvent>::builder("bad")
            .valid_stages([Stage::Working])
            .init_stage(Stage::Working)
            .transition(Stage::Working, StageEvent::Work, Stage::Working)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_call_tool_converts_handler_errors() {
        use crate::task::states::{base_states, base_transitions};
        use crate::task::tree::TreeTask;
        use crate::task::Task;
        use futures::FutureExt;

        let tool = WorkflowTool::new(
            ToolDescriptor::new("boom", "always fails"),
            Arc::new(|_task, _args, _inject| {
                async { Err(EngineError::ToolExecution("kaput".into())) }.boxed()
            }),
        );
        let workflow = Workflow::<Stage, StageEvent, TaskState, TaskEvent>::builder("t")
            .valid_stages([Stage::Working])
            .init_stage(Stage::Working)
            .transition(Stage::Working, StageEvent::Work, Stage::Working)
            .event_chain([StageEvent::Work])
            .tool(tool)
            .build()
            .unwrap();

        let task = Task::builder()
            .valid_states(base_states())
            .init_state(TaskState::Created)
            .transitions(base_transitions())
            .build()
            .unwrap();
        let handle = TreeTask::new(task, 3).into_handle();

        let output = workflow
            .call_tool(
                "boom",
                handle,
                serde_json::Value::Null,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.content, vec![ContentBlock::text("tool execution failed: kaput")]);

        assert!(workflow
            .call_tool(
                "missing",
                TreeTask::new(
                    Task::builder()
                        .valid_states(base_states())
                        .init_state(TaskState::Created)
                        .transitions(base_transitions())
                        .build()
                        .unwrap(),
                    3
                )
                .into_handle(),
                serde_json::Value::Null,
                serde_json::json!({}),
            )
            .await
            .is_err());
    }
}
