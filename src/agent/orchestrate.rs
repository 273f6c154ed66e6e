//! The orchestrator: a `Thinking <-> Orchestrating -> Finished` workflow
//! that decomposes a tree task into sub-tasks.
//!
//! The thinking action drafts a decomposition wrapped in an
//! `<orchestration>` label; the orchestrating action asks for the plan as
//! JSON and feeds it through the workflow-local `create_sub_tasks` tool,
//! which instantiates child tasks and attaches them to the parent node.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use crate::agent::{Agent, StepOutcome};
use crate::error::{EngineError, EngineResult};
use crate::machine::sync_hook;
use crate::ports::{LanguageModel, ToolService};
use crate::settings::Settings;
use crate::task::states::{TaskEvent, TaskState};
use crate::task::tree::TreeTask;
use crate::task::view::{protocol_view, requirement_view};
use crate::types::message::{ContentBlock, Message, Role, ToolCallRequest};
use crate::types::params::CompletionConfig;
use crate::types::tools::{ToolDescriptor, ToolOutput};
use crate::utils::extract_by_label;
use crate::workflow::{ObserveFn, StageAction, Workflow, WorkflowTool};

/// Stages of the orchestrate workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestrateStage {
    Thinking,
    Orchestrating,
    Finished,
}

impl OrchestrateStage {
    /// Stage name used for settings lookups.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Orchestrating => "orchestrating",
            Self::Finished => "finished",
        }
    }
}

/// Events of the orchestrate workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestrateEvent {
    Think,
    Orchestrate,
    Finish,
}

/// Builds fresh sub-task nodes for one task type.
pub type TaskFactory =
    Arc<dyn Fn() -> EngineResult<TreeTask<TaskState, TaskEvent>> + Send + Sync>;

/// Labels wrapping the decomposition draft.
const ORCHESTRATION_LABELS: &[&str] = &["orchestration", "orchestrate"];

const THINKING_PROMPT_HEADER: &str = "Break the task into sub-tasks. Wrap your decomposition \
draft in an <orchestration>...</orchestration> label. The available sub-task types are:";

const ORCHESTRATING_PROMPT: &str = "Emit the final plan as a JSON array, one object per \
sub-task, each with the fields \"title\", \"task_type\", and \"input\".";

/// The stage set of the orchestrate workflow.
pub fn orchestrate_stages() -> HashSet<OrchestrateStage> {
    [
        OrchestrateStage::Thinking,
        OrchestrateStage::Orchestrating,
        OrchestrateStage::Finished,
    ]
    .into_iter()
    .collect()
}

/// The event chain: `Think` restarts a round, `Finish` ends the run.
pub fn orchestrate_event_chain() -> Vec<OrchestrateEvent> {
    vec![
        OrchestrateEvent::Think,
        OrchestrateEvent::Orchestrate,
        OrchestrateEvent::Finish,
    ]
}

#[derive(serde::Deserialize)]
struct SubTaskSpec {
    title: String,
    task_type: String,
    input: String,
}

/// The workflow-local tool that instantiates the planned sub-tasks and
/// attaches them to the parent node.
pub fn create_sub_tasks_tool(
    valid_tasks: HashMap<String, TaskFactory>,
) -> WorkflowTool<TaskState, TaskEvent> {
    WorkflowTool::new(
        ToolDescriptor::new(
            "create_sub_tasks",
            "Create sub-tasks from a JSON plan and attach them to the current task.",
        )
        .with_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "json_str": {
                    "type": "string",
                    "description": "JSON array of {title, task_type, input} objects."
                }
            },
            "required": ["json_str"]
        })),
        Arc::new(move |task, args, _inject| {
            let valid_tasks = valid_tasks.clone();
            async move {
                let json_str = args
                    .get("json_str")
                    .and_then(|value| value.as_str())
                    .ok_or_else(|| {
                        EngineError::ToolExecution("create_sub_tasks requires `json_str`".into())
                    })?;
                let specs: Vec<SubTaskSpec> = serde_json::from_str(json_str).map_err(|err| {
                    EngineError::ToolExecution(format!("cannot parse sub-task plan: {err}"))
                })?;

                // validate the whole plan before touching the tree
                for spec in &specs {
                    if !valid_tasks.contains_key(&spec.task_type) {
                        return Err(EngineError::ToolExecution(format!(
                            "unknown sub-task type `{}`",
                            spec.task_type
                        )));
                    }
                }

                let mut created = 0usize;
                for spec in specs {
                    let factory = &valid_tasks[&spec.task_type];
                    let mut sub_task = factory()?;
                    sub_task.set_title(spec.title);
                    sub_task.set_input(vec![ContentBlock::text(spec.input)]);
                    TreeTask::add_sub_task(&task, sub_task.into_handle()).await?;
                    created += 1;
                }
                Ok(ToolOutput::text(format!("created {created} sub-tasks")))
            }
            .boxed()
        }),
    )
}

/// Action body of the thinking stage.
pub fn thinking_action() -> StageAction<OrchestrateStage, OrchestrateEvent, TaskState, TaskEvent>
{
    Arc::new(|agent, workflow, context, queue, task| {
        async move {
            let (stage, prompt, observe_fn, config, llm) = {
                let guard = workflow.lock().await;
                (
                    guard.current_stage(),
                    guard.prompt().map(str::to_string),
                    guard.observe_fn(),
                    guard.completion_config(),
                    guard.llm()?,
                )
            };
            if stage != OrchestrateStage::Thinking {
                return Err(EngineError::Internal(format!(
                    "thinking action invoked at stage {stage:?}"
                )));
            }

            if let Some(prompt) = prompt {
                task.lock()
                    .await
                    .append_context(Message::user(prompt).build())?;
            }
            if let Some(observe_fn) = observe_fn {
                agent.observe(&context, &queue, &task, observe_fn).await?;
            }

            let message = match agent
                .think(&context, &queue, &task, llm, Vec::new(), &config)
                .await?
            {
                StepOutcome::Message(message) => message,
                StepOutcome::Interfered(blocks) => {
                    task.lock().await.append_context(
                        Message::with_content(Role::User, blocks)
                            .with_error(true)
                            .build(),
                    )?;
                    return Ok(OrchestrateEvent::Think);
                }
            };

            let orchestration = extract_by_label(&message.text(), ORCHESTRATION_LABELS);
            if orchestration.is_empty() {
                task.lock()
                    .await
                    .set_error("the decomposition draft was empty");
                return Ok(OrchestrateEvent::Finish);
            }

            Ok(OrchestrateEvent::Orchestrate)
        }
        .boxed()
    })
}

/// Action body of the orchestrating stage.
pub fn orchestrating_action(
) -> StageAction<OrchestrateStage, OrchestrateEvent, TaskState, TaskEvent> {
    Arc::new(|agent, workflow, context, queue, task| {
        async move {
            let (stage, prompt, observe_fn, mut config, llm) = {
                let guard = workflow.lock().await;
                (
                    guard.current_stage(),
                    guard.prompt().map(str::to_string),
                    guard.observe_fn(),
                    guard.completion_config(),
                    guard.llm()?,
                )
            };
            if stage != OrchestrateStage::Orchestrating {
                return Err(EngineError::Internal(format!(
                    "orchestrating action invoked at stage {stage:?}"
                )));
            }
            config.format_json = true;

            if let Some(prompt) = prompt {
                task.lock()
                    .await
                    .append_context(Message::user(prompt).build())?;
            }
            if let Some(observe_fn) = observe_fn {
                agent.observe(&context, &queue, &task, observe_fn).await?;
            }

            let message = match agent
                .think(&context, &queue, &task, llm, Vec::new(), &config)
                .await?
            {
                StepOutcome::Message(message) => message,
                StepOutcome::Interfered(blocks) => {
                    task.lock().await.append_context(
                        Message::with_content(Role::User, blocks)
                            .with_error(true)
                            .build(),
                    )?;
                    return Ok(OrchestrateEvent::Think);
                }
            };

            let tool_call = ToolCallRequest::new(
                "auto_create_sub_tasks",
                "create_sub_tasks",
                serde_json::json!({ "json_str": message.text() }),
            );
            let failed = match agent
                .act(
                    &context,
                    &workflow,
                    &queue,
                    &tool_call,
                    &task,
                    serde_json::Value::Null,
                )
                .await?
            {
                StepOutcome::Message(result) => result.is_error,
                StepOutcome::Interfered(_) => true,
            };
            if failed {
                task.lock().await.set_error(message.text());
                return Ok(OrchestrateEvent::Think);
            }

            Ok(OrchestrateEvent::Finish)
        }
        .boxed()
    })
}

/// Build an orchestrator agent over the given sub-task catalogue.
pub fn build_orchestrator_agent(
    name: &str,
    settings: &Settings,
    llms: HashMap<OrchestrateStage, Arc<dyn LanguageModel>>,
    valid_tasks: HashMap<String, TaskFactory>,
    tool_service: Option<Arc<dyn ToolService>>,
    prompts: Option<HashMap<OrchestrateStage, String>>,
    observe_fns: Option<HashMap<OrchestrateStage, ObserveFn<TaskState, TaskEvent>>>,
) -> EngineResult<Agent<OrchestrateStage, OrchestrateEvent, TaskState, TaskEvent>> {
    let agent_config = settings
        .agent_config(name)
        .ok_or_else(|| EngineError::configuration(format!("no agent configured as `{name}`")))?;

    let agent = Agent::new(name, agent_config.agent_type.as_str(), tool_service);

    let mut completion_configs: HashMap<OrchestrateStage, CompletionConfig> = HashMap::new();
    for stage in [
        OrchestrateStage::Thinking,
        OrchestrateStage::Orchestrating,
    ] {
        completion_configs.insert(
            stage,
            agent_config.llm_config(stage.name()).completion_config(),
        );
    }

    let prompts = match prompts {
        Some(prompts) => prompts,
        None => {
            let mut catalogue: Vec<(&String, &TaskFactory)> = valid_tasks.iter().collect();
            catalogue.sort_by(|a, b| a.0.cmp(b.0));
            let mut thinking_prompt = String::from(THINKING_PROMPT_HEADER);
            for (type_name, factory) in catalogue {
                let sample = factory()?;
                thinking_prompt.push_str(&format!(
                    "\n- {type_name}: {}",
                    protocol_view(sample.task()).trim_end()
                ));
            }
            HashMap::from([
                (OrchestrateStage::Thinking, thinking_prompt),
                (
                    OrchestrateStage::Orchestrating,
                    ORCHESTRATING_PROMPT.to_string(),
                ),
            ])
        }
    };
    let observe_fns = observe_fns.unwrap_or_else(|| {
        let observe: ObserveFn<TaskState, TaskEvent> =
            Arc::new(|task| Message::user(requirement_view(task)).build());
        HashMap::from([
            (OrchestrateStage::Thinking, observe.clone()),
            (OrchestrateStage::Orchestrating, observe),
        ])
    });

    let factory = {
        let prompts = prompts.clone();
        let observe_fns = observe_fns.clone();
        let completion_configs = completion_configs.clone();
        let llms = llms.clone();
        let valid_tasks = valid_tasks.clone();
        move || -> EngineResult<Workflow<OrchestrateStage, OrchestrateEvent, TaskState, TaskEvent>> {
            let mut builder = Workflow::builder("orchestrate_workflow")
                .valid_stages(orchestrate_stages())
                .init_stage(OrchestrateStage::Thinking)
                .event_chain(orchestrate_event_chain())
                .transition_with(
                    OrchestrateStage::Thinking,
                    OrchestrateEvent::Think,
                    OrchestrateStage::Thinking,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "re-entering thinking");
                    }),
                )
                .transition_with(
                    OrchestrateStage::Thinking,
                    OrchestrateEvent::Orchestrate,
                    OrchestrateStage::Orchestrating,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "thinking -> orchestrating");
                    }),
                )
                .transition_with(
                    OrchestrateStage::Thinking,
                    OrchestrateEvent::Finish,
                    OrchestrateStage::Finished,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "thinking -> finished");
                    }),
                )
                .transition_with(
                    OrchestrateStage::Orchestrating,
                    OrchestrateEvent::Think,
                    OrchestrateStage::Thinking,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "orchestrating -> thinking");
                    }),
                )
                .transition_with(
                    OrchestrateStage::Orchestrating,
                    OrchestrateEvent::Finish,
                    OrchestrateStage::Finished,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "orchestrating -> finished");
                    }),
                )
                .action(OrchestrateStage::Thinking, thinking_action())
                .action(OrchestrateStage::Orchestrating, orchestrating_action())
                .tool(create_sub_tasks_tool(valid_tasks.clone()));
            for (stage, prompt) in &prompts {
                builder = builder.prompt(*stage, prompt.clone());
            }
            for (stage, observe_fn) in &observe_fns {
                builder = builder.observe_fn(*stage, observe_fn.clone());
            }
            for (stage, config) in &completion_configs {
                builder = builder.completion_config(*stage, config.clone());
            }
            for (stage, llm) in &llms {
                builder = builder.llm(*stage, llm.clone());
            }
            builder.build()
        }
    };
    agent.set_workflow_factory(Arc::new(factory))?;
    Ok(agent)
}
