//! Agents: executors of workflow machines.
//!
//! An agent owns a workflow factory (one fresh workflow per task run), an
//! optional tool-service handle, and eight ordered hook lists. Its three
//! runtime capabilities - observe, think, act - each wrap the operation in
//! its pre/post hooks; `run_task_stream` drives the workflow event chain
//! until the chain's last event fires.

pub mod hooks;
pub mod orchestrate;
pub mod reflect;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, State};
use crate::ports::{LanguageModel, ToolService};
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;
use crate::types::message::{Message, ToolCallRequest};
use crate::types::params::CompletionConfig;
use crate::types::tools::{ToolDescriptor, ToolOutput};
use crate::workflow::{ObserveFn, Workflow, WorkflowHandle};

pub use hooks::{act_hook, task_hook, ActHookPoint, HookOutcome, StreamHookPoint, TaskHookPoint};
pub use orchestrate::{build_orchestrator_agent, OrchestrateEvent, OrchestrateStage};
pub use reflect::{build_reflect_agent, ReflectEvent, ReflectStage};

/// Capacity of the internal stream queue created per streaming think.
const STREAM_QUEUE_CAPACITY: usize = 256;

/// Poll interval while waiting for the stream queue to drain.
const STREAM_DRAIN_POLL: Duration = Duration::from_millis(10);

/// Produces one fresh workflow instance per task run.
pub type WorkflowFactory<St, Ev, S, E> =
    Arc<dyn Fn() -> EngineResult<Workflow<St, Ev, S, E>> + Send + Sync>;

/// Result of a think or act step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The step produced a message (already appended to the task context).
    Message(Message),
    /// A hook interfered; the content should be fed back as a USER turn.
    Interfered(Vec<crate::types::message::ContentBlock>),
}

/// An agent executing workflows over tasks.
pub struct Agent<St: State, Ev: Event, S: State, E: Event> {
    id: String,
    name: String,
    agent_type: String,
    workflow_factory: std::sync::Mutex<Option<WorkflowFactory<St, Ev, S, E>>>,
    tool_service: Option<Arc<dyn ToolService>>,
    pre_run_once_hooks: Vec<Arc<dyn TaskHookPoint<S, E>>>,
    post_run_once_hooks: Vec<Arc<dyn TaskHookPoint<S, E>>>,
    pre_observe_hooks: Vec<Arc<dyn TaskHookPoint<S, E>>>,
    post_observe_hooks: Vec<Arc<dyn TaskHookPoint<S, E>>>,
    pre_think_hooks: Vec<Arc<dyn TaskHookPoint<S, E>>>,
    post_think_hooks: Vec<Arc<dyn StreamHookPoint<S, E>>>,
    pre_act_hooks: Vec<Arc<dyn ActHookPoint<S, E>>>,
    post_act_hooks: Vec<Arc<dyn TaskHookPoint<S, E>>>,
}

impl<St: State, Ev: Event, S: State, E: Event> Agent<St, Ev, S, E> {
    /// Create an agent with empty hook lists and no workflow factory.
    pub fn new(
        name: impl Into<String>,
        agent_type: impl Into<String>,
        tool_service: Option<Arc<dyn ToolService>>,
    ) -> Self {
        Self {
            id: format!("agent_{}", Uuid::new_v4().simple()),
            name: name.into(),
            agent_type: agent_type.into(),
            workflow_factory: std::sync::Mutex::new(None),
            tool_service,
            pre_run_once_hooks: Vec::new(),
            post_run_once_hooks: Vec::new(),
            pre_observe_hooks: Vec::new(),
            post_observe_hooks: Vec::new(),
            pre_think_hooks: Vec::new(),
            post_think_hooks: Vec::new(),
            pre_act_hooks: Vec::new(),
            post_act_hooks: Vec::new(),
        }
    }

    /// Stable identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Agent type tag.
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// The tool service, if one is attached.
    pub fn tool_service(&self) -> Option<Arc<dyn ToolService>> {
        self.tool_service.clone()
    }

    /// Install the workflow factory; may only happen once.
    pub fn set_workflow_factory(
        &self,
        factory: WorkflowFactory<St, Ev, S, E>,
    ) -> EngineResult<()> {
        let mut slot = self
            .workflow_factory
            .lock()
            .map_err(|_| EngineError::Internal("workflow factory lock poisoned".into()))?;
        if slot.is_some() {
            return Err(EngineError::configuration(
                "workflow factory is already set for this agent",
            ));
        }
        *slot = Some(factory);
        Ok(())
    }

    /// Produce a fresh workflow instance from the factory.
    pub fn workflow(&self) -> EngineResult<Workflow<St, Ev, S, E>> {
        let factory = self
            .workflow_factory
            .lock()
            .map_err(|_| EngineError::Internal("workflow factory lock poisoned".into()))?
            .clone()
            .ok_or_else(|| EngineError::configuration("workflow factory is not set"))?;
        factory()
    }

    // ---------- hook registration ----------

    pub fn add_pre_run_once_hook(&mut self, hook: Arc<dyn TaskHookPoint<S, E>>) {
        self.pre_run_once_hooks.push(hook);
    }

    pub fn add_post_run_once_hook(&mut self, hook: Arc<dyn TaskHookPoint<S, E>>) {
        self.post_run_once_hooks.push(hook);
    }

    pub fn add_pre_observe_hook(&mut self, hook: Arc<dyn TaskHookPoint<S, E>>) {
        self.pre_observe_hooks.push(hook);
    }

    pub fn add_post_observe_hook(&mut self, hook: Arc<dyn TaskHookPoint<S, E>>) {
        self.post_observe_hooks.push(hook);
    }

    pub fn add_pre_think_hook(&mut self, hook: Arc<dyn TaskHookPoint<S, E>>) {
        self.pre_think_hooks.push(hook);
    }

    pub fn add_post_think_hook(&mut self, hook: Arc<dyn StreamHookPoint<S, E>>) {
        self.post_think_hooks.push(hook);
    }

    pub fn add_pre_act_hook(&mut self, hook: Arc<dyn ActHookPoint<S, E>>) {
        self.pre_act_hooks.push(hook);
    }

    pub fn add_post_act_hook(&mut self, hook: Arc<dyn TaskHookPoint<S, E>>) {
        self.post_act_hooks.push(hook);
    }

    // ---------- tool discovery ----------

    /// Fetch service tools whose tag sets are covered by `tags`. Without a
    /// tool service the result is empty.
    pub async fn tools_with_tags(
        &self,
        tags: &HashSet<String>,
    ) -> EngineResult<Vec<ToolDescriptor>> {
        let Some(service) = &self.tool_service else {
            return Ok(Vec::new());
        };
        let all = service.list_tools().await?;
        Ok(all
            .into_iter()
            .filter(|tool| tool.tags.is_subset(tags))
            .collect())
    }

    // ---------- task execution ----------

    /// Drive one workflow instance over `task` until the event chain's
    /// last event fires.
    pub async fn run_task_stream(
        self: Arc<Self>,
        context: RunContext,
        queue: MessageQueue,
        task: TreeTaskHandle<S, E>,
    ) -> EngineResult<()> {
        let workflow: WorkflowHandle<St, Ev, S, E> = Arc::new(Mutex::new(self.workflow()?));
        let chain = { workflow.lock().await.event_chain().to_vec() };
        let first = chain[0];
        let last = *chain.last().expect("builder rejects empty event chains");

        let mut event = first;
        let mut running = true;
        while running {
            self.run_task_hooks(&self.pre_run_once_hooks, &context, &queue, &task)
                .await?;

            loop {
                {
                    workflow.lock().await.handle_event(event).await?;
                }
                if event == last {
                    running = false;
                    break;
                }
                let action = { workflow.lock().await.action()? };
                event = action(
                    self.clone(),
                    workflow.clone(),
                    context.clone(),
                    queue.clone(),
                    task.clone(),
                )
                .await?;
                if event == first {
                    // end of round
                    break;
                }
            }

            self.run_task_hooks(&self.post_run_once_hooks, &context, &queue, &task)
                .await?;
        }
        let task_id = { task.lock().await.id().to_string() };
        debug!(agent = %self.id, task = %task_id, "task run finished");
        Ok(())
    }

    /// Observe the task: render it via `observe_fn`, append the result to
    /// the task context, and return the full history.
    pub async fn observe(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
        observe_fn: ObserveFn<S, E>,
    ) -> EngineResult<Vec<Message>> {
        self.run_task_hooks(&self.pre_observe_hooks, context, queue, task)
            .await?;

        let history = {
            let mut guard = task.lock().await;
            let observed = observe_fn(guard.task());
            guard.append_context(observed)?;
            guard.context_messages()
        };

        self.run_task_hooks(&self.post_observe_hooks, context, queue, task)
            .await?;
        Ok(history)
    }

    /// Think over the task context with `llm`.
    ///
    /// In streaming mode an internal bounded queue is created, the
    /// post-think hooks run concurrently as the drainer, and the queue is
    /// closed only once every chunk has been consumed; the aggregated
    /// message is appended to the task context after the drainer finished.
    pub async fn think(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
        llm: Arc<dyn LanguageModel>,
        valid_tools: Vec<ToolDescriptor>,
        config: &CompletionConfig,
    ) -> EngineResult<StepOutcome> {
        for hook in &self.pre_think_hooks {
            if let HookOutcome::Interfere(blocks) = hook.invoke(context, queue, task).await? {
                return Ok(StepOutcome::Interfered(blocks));
            }
        }

        let messages = { task.lock().await.context_messages() };

        if !config.stream {
            let result = llm.completion(messages, valid_tools, None, config).await?;
            {
                task.lock().await.append_context(result.clone())?;
            }
            for hook in &self.post_think_hooks {
                if let HookOutcome::Interfere(blocks) =
                    hook.invoke(context, queue, None, task).await?
                {
                    return Ok(StepOutcome::Interfered(blocks));
                }
            }
            return Ok(StepOutcome::Message(result));
        }

        let stream_queue = MessageQueue::bounded(STREAM_QUEUE_CAPACITY);
        let drainer = {
            let hooks = self.post_think_hooks.clone();
            let context = context.clone();
            let queue = queue.clone();
            let stream = stream_queue.clone();
            let task = task.clone();
            tokio::spawn(async move {
                for hook in &hooks {
                    if let HookOutcome::Interfere(blocks) =
                        hook.invoke(&context, &queue, Some(&stream), &task).await?
                    {
                        return Ok(HookOutcome::Interfere(blocks));
                    }
                }
                Ok::<HookOutcome, EngineError>(HookOutcome::Continue)
            })
        };

        let completion = llm
            .completion(messages, valid_tools, Some(stream_queue.clone()), config)
            .await;

        // every chunk must reach the drainer before the queue closes; a
        // dead drainer will never empty the queue, so stop waiting on it
        while !stream_queue.is_empty() && !drainer.is_finished() {
            tokio::time::sleep(STREAM_DRAIN_POLL).await;
        }
        stream_queue.close();
        let drained = drainer
            .await
            .map_err(|err| EngineError::Internal(format!("stream drainer panicked: {err}")))?;

        let result = completion?;
        if let HookOutcome::Interfere(blocks) = drained? {
            return Ok(StepOutcome::Interfered(blocks));
        }
        {
            task.lock().await.append_context(result.clone())?;
        }
        Ok(StepOutcome::Message(result))
    }

    /// Act on a tool call: resolve workflow-local tools first (verifying
    /// required tags), fall back to the tool service (injecting the run
    /// context into the arguments), convert the output into a TOOL-role
    /// message, and append it to the task context.
    pub async fn act(
        &self,
        context: &RunContext,
        workflow: &WorkflowHandle<St, Ev, S, E>,
        queue: &MessageQueue,
        tool_call: &ToolCallRequest,
        task: &TreeTaskHandle<S, E>,
        inject: serde_json::Value,
    ) -> EngineResult<StepOutcome> {
        for hook in &self.pre_act_hooks {
            if let HookOutcome::Interfere(blocks) =
                hook.invoke(context, queue, task, tool_call).await?
            {
                return Ok(StepOutcome::Interfered(blocks));
            }
        }

        let workflow_tool = { workflow.lock().await.tool(&tool_call.name) };
        let output = if let Some(tool) = workflow_tool {
            let task_tags = { task.lock().await.tags() };
            if !tool.required_tags.is_subset(&task_tags) {
                let mut required: Vec<String> = tool.required_tags.iter().cloned().collect();
                let mut actual: Vec<String> = task_tags.into_iter().collect();
                required.sort();
                actual.sort();
                return Err(EngineError::ToolTagMismatch {
                    name: tool_call.name.clone(),
                    required,
                    actual,
                });
            }
            tool.invoke(task.clone(), tool_call.args.clone(), inject).await
        } else if let Some(service) = &self.tool_service {
            let mut arguments = tool_call.args.clone();
            if let serde_json::Value::Object(map) = &mut arguments {
                map.insert(
                    "context".to_string(),
                    serde_json::Value::Object(context.snapshot()),
                );
            }
            match service.call_tool(&tool_call.name, arguments).await {
                Ok(output) => output,
                Err(err) => ToolOutput::error(err.to_string()),
            }
        } else {
            return Err(EngineError::tool_not_found(tool_call.name.as_str()));
        };

        let mut metadata = serde_json::Map::new();
        match output.structured_content {
            Some(serde_json::Value::Object(map)) => metadata = map,
            Some(other) => {
                metadata.insert("structured_content".to_string(), other);
            }
            None => {}
        }
        let message = Message::tool_result(tool_call.id.as_str(), output.content, output.is_error)
            .with_metadata(metadata)
            .build();
        {
            task.lock().await.append_context(message.clone())?;
        }

        for hook in &self.post_act_hooks {
            if let HookOutcome::Interfere(blocks) = hook.invoke(context, queue, task).await? {
                return Ok(StepOutcome::Interfered(blocks));
            }
        }
        Ok(StepOutcome::Message(message))
    }

    /// Run a list of task hooks in order. Interference is meaningless at
    /// these points and is logged, not propagated.
    async fn run_task_hooks(
        &self,
        hooks: &[Arc<dyn TaskHookPoint<S, E>>],
        context: &RunContext,
        queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<()> {
        for hook in hooks {
            if let HookOutcome::Interfere(_) = hook.invoke(context, queue, task).await? {
                warn!(agent = %self.id, "hook interference ignored outside think/act");
            }
        }
        Ok(())
    }
}
