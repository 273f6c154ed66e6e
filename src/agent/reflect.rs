//! The reflect executor: a `Reasoning <-> Reflecting -> Finished` workflow.
//!
//! The reasoning action observes the task, thinks with the service tools
//! the task's tags allow, and executes any requested tool calls; the
//! reflecting action reviews the result with the workflow-local tools and
//! either loops back to reasoning or finishes. Interference from hooks is
//! fed back into the context as a USER turn and the stage re-enters.

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
use crate::task::view::requirement_view;
use crate::types::message::{ContentBlock, Message, Role, StopReason};
use crate::types::params::CompletionConfig;
use crate::types::tools::ToolDescriptor;
use crate::utils::extract_by_label;
use crate::workflow::{ObserveFn, StageAction, Workflow, WorkflowTool};

/// Stages of the reflect workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectStage {
    Reasoning,
    Reflecting,
    Finished,
}

impl ReflectStage {
    /// Stage name used for settings lookups.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Reflecting => "reflecting",
            Self::Finished => "finished",
        }
    }
}

/// Events of the reflect workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectEvent {
    Reason,
    Reflect,
    Finish,
}

/// Stop words that truncate the model output right after a finish label.
const FINISH_STOP_WORDS: &[&str] = &[
    "</finish>",
    "</finish_flag>",
    "</final_flag>",
    "</end_flag>",
];

/// Labels the reflecting stage checks for an explicit finish signal.
const FINISH_LABELS: &[&str] = &["finish", "finish_flag", "finish_workflow"];

const REASONING_PROMPT: &str = "Work on the task below. Use the available tools when they \
help, and wrap your final conclusion in a <finish>...</finish> label once the requirement \
is met.";

/// The stage set of the reflect workflow.
pub fn reflect_stages() -> HashSet<ReflectStage> {
    [
        ReflectStage::Reasoning,
        ReflectStage::Reflecting,
        ReflectStage::Finished,
    ]
    .into_iter()
    .collect()
}

/// The event chain: `Reason` restarts a round, `Finish` ends the run.
pub fn reflect_event_chain() -> Vec<ReflectEvent> {
    vec![
        ReflectEvent::Reason,
        ReflectEvent::Reflect,
        ReflectEvent::Finish,
    ]
}

/// The workflow-local tool recording the task's final output.
pub fn finish_task_tool() -> WorkflowTool<TaskState, TaskEvent> {
    WorkflowTool::new(
        ToolDescriptor::new(
            "finish_task",
            "Record the final result of the task and mark it completed.",
        )
        .with_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "The final answer for the task requirement."
                }
            },
            "required": ["result"]
        })),
        Arc::new(|task, args, _inject| {
            async move {
                let result = args
                    .get("result")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string();
                task.lock()
                    .await
                    .set_completed(vec![ContentBlock::text(result)]);
                Ok(crate::types::tools::ToolOutput::text("task output recorded"))
            }
            .boxed()
        }),
    )
}

/// Action body of the reasoning stage.
pub fn reason_action() -> StageAction<ReflectStage, ReflectEvent, TaskState, TaskEvent> {
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
            if stage != ReflectStage::Reasoning {
                return Err(EngineError::Internal(format!(
                    "reason action invoked at stage {stage:?}"
                )));
            }

            let tags = { task.lock().await.tags() };
            let service_tools = agent.tools_with_tags(&tags).await?;
            config.set_stop_words(FINISH_STOP_WORDS.iter().copied());

            if let Some(prompt) = prompt {
                task.lock()
                    .await
                    .append_context(Message::user(prompt).build())?;
            }
            if let Some(observe_fn) = observe_fn {
                agent.observe(&context, &queue, &task, observe_fn).await?;
            }

            let message = match agent
                .think(&context, &queue, &task, llm, service_tools, &config)
                .await?
            {
                StepOutcome::Message(message) => message,
                StepOutcome::Interfered(blocks) => {
                    task.lock().await.append_context(
                        Message::with_content(Role::User, blocks)
                            .with_error(true)
                            .build(),
                    )?;
                    return Ok(ReflectEvent::Reason);
                }
            };

            if message.stop_reason == StopReason::ToolCall {
                // a failed call aborts the batch: the task is marked in
                // error and the workflow finishes so the scheduler decides
                for tool_call in &message.tool_calls {
                    let failure = match agent
                        .act(
                            &context,
                            &workflow,
                            &queue,
                            tool_call,
                            &task,
                            serde_json::Value::Null,
                        )
                        .await?
                    {
                        StepOutcome::Message(result) if result.is_error => Some(result.text()),
                        StepOutcome::Message(_) => None,
                        StepOutcome::Interfered(blocks) => {
                            Some(crate::types::message::blocks_text(&blocks))
                        }
                    };
                    if let Some(error) = failure {
                        task.lock().await.set_error(error);
                        return Ok(ReflectEvent::Finish);
                    }
                }
            }

            Ok(ReflectEvent::Reflect)
        }
        .boxed()
    })
}

/// Action body of the reflecting stage.
pub fn reflect_action() -> StageAction<ReflectStage, ReflectEvent, TaskState, TaskEvent> {
    Arc::new(|agent, workflow, context, queue, task| {
        async move {
            let (stage, prompt, observe_fn, mut config, llm, tools, finish_tool) = {
                let guard = workflow.lock().await;
                (
                    guard.current_stage(),
                    guard.prompt().map(str::to_string),
                    guard.observe_fn(),
                    guard.completion_config(),
                    guard.llm()?,
                    guard.tool_descriptors(),
                    guard.tool("finish_task"),
                )
            };
            if stage != ReflectStage::Reflecting {
                return Err(EngineError::Internal(format!(
                    "reflect action invoked at stage {stage:?}"
                )));
            }
            config.set_stop_words(FINISH_STOP_WORDS.iter().copied());

            if let Some(prompt) = prompt {
                task.lock()
                    .await
                    .append_context(Message::user(prompt).build())?;
            }
            if let Some(observe_fn) = observe_fn {
                agent.observe(&context, &queue, &task, observe_fn).await?;
            }

            let message = match agent
                .think(&context, &queue, &task, llm, tools, &config)
                .await?
            {
                StepOutcome::Message(message) => message,
                StepOutcome::Interfered(blocks) => {
                    task.lock().await.append_context(
                        Message::with_content(Role::User, blocks)
                            .with_error(true)
                            .build(),
                    )?;
                    return Ok(ReflectEvent::Reason);
                }
            };

            let finish_flag = extract_by_label(&message.text(), FINISH_LABELS);

            if message.stop_reason == StopReason::ToolCall {
                let mut allow_tool = true;
                for tool_call in &message.tool_calls {
                    if !allow_tool {
                        task.lock().await.append_context(
                            Message::tool_result(
                                tool_call.id.as_str(),
                                vec![ContentBlock::text(
                                    "skipped: an earlier tool call in this batch failed",
                                )],
                                true,
                            )
                            .build(),
                        )?;
                        continue;
                    }
                    let failure = match agent
                        .act(
                            &context,
                            &workflow,
                            &queue,
                            tool_call,
                            &task,
                            serde_json::Value::Null,
                        )
                        .await?
                    {
                        StepOutcome::Message(result) if result.is_error => Some(result.text()),
                        StepOutcome::Message(_) => None,
                        StepOutcome::Interfered(blocks) => {
                            Some(crate::types::message::blocks_text(&blocks))
                        }
                    };
                    if let Some(error) = failure {
                        task.lock().await.set_error(error);
                        allow_tool = false;
                    }
                }
            } else if finish_flag.eq_ignore_ascii_case("true") {
                // the model signalled completion without calling the tool
                if let Some(finish_tool) = finish_tool {
                    finish_tool
                        .invoke(
                            task.clone(),
                            serde_json::json!({ "result": message.text() }),
                            serde_json::Value::Null,
                        )
                        .await;
                }
            }

            let errored = { task.lock().await.is_error() };
            if errored {
                Ok(ReflectEvent::Reason)
            } else {
                Ok(ReflectEvent::Finish)
            }
        }
        .boxed()
    })
}

/// Build a reflect agent. Language models are injected per stage; the
/// workflow factory wires them into every per-run workflow instance.
pub fn build_reflect_agent(
    name: &str,
    settings: &Settings,
    llms: HashMap<ReflectStage, Arc<dyn LanguageModel>>,
    tool_service: Option<Arc<dyn ToolService>>,
    prompts: Option<HashMap<ReflectStage, String>>,
    observe_fns: Option<HashMap<ReflectStage, ObserveFn<TaskState, TaskEvent>>>,
) -> EngineResult<Agent<ReflectStage, ReflectEvent, TaskState, TaskEvent>> {
    let agent_config = settings
        .agent_config(name)
        .ok_or_else(|| EngineError::configuration(format!("no agent configured as `{name}`")))?;

    let agent = Agent::new(name, agent_config.agent_type.as_str(), tool_service);

    let mut completion_configs: HashMap<ReflectStage, CompletionConfig> = HashMap::new();
    for stage in [ReflectStage::Reasoning, ReflectStage::Reflecting] {
        completion_configs.insert(
            stage,
            agent_config.llm_config(stage.name()).completion_config(),
        );
    }

    let prompts = prompts.unwrap_or_else(|| {
        HashMap::from([(ReflectStage::Reasoning, REASONING_PROMPT.to_string())])
    });
    let observe_fns = observe_fns.unwrap_or_else(|| {
        let observe: ObserveFn<TaskState, TaskEvent> =
            Arc::new(|task| Message::user(requirement_view(task)).build());
        HashMap::from([
            (ReflectStage::Reasoning, observe.clone()),
            (ReflectStage::Reflecting, observe),
        ])
    });

    let factory = {
        let prompts = prompts.clone();
        let observe_fns = observe_fns.clone();
        let completion_configs = completion_configs.clone();
        let llms = llms.clone();
        move || -> EngineResult<Workflow<ReflectStage, ReflectEvent, TaskState, TaskEvent>> {
            let mut builder = Workflow::builder("reflect_workflow")
                .valid_stages(reflect_stages())
                .init_stage(ReflectStage::Reasoning)
                .event_chain(reflect_event_chain())
                .transition_with(
                    ReflectStage::Reasoning,
                    ReflectEvent::Reason,
                    ReflectStage::Reasoning,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "re-entering reasoning");
                    }),
                )
                .transition_with(
                    ReflectStage::Reasoning,
                    ReflectEvent::Reflect,
                    ReflectStage::Reflecting,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "reasoning -> reflecting");
                    }),
                )
                .transition_with(
                    ReflectStage::Reasoning,
                    ReflectEvent::Finish,
                    ReflectStage::Finished,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "reasoning -> finished");
                    }),
                )
                .transition_with(
                    ReflectStage::Reflecting,
                    ReflectEvent::Reason,
                    ReflectStage::Reasoning,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "reflecting -> reasoning");
                    }),
                )
                .transition_with(
                    ReflectStage::Reflecting,
                    ReflectEvent::Finish,
                    ReflectStage::Finished,
                    sync_hook(|workflow: &mut Workflow<_, _, _, _>| {
                        debug!(workflow = %workflow.id(), "reflecting -> finished");
                    }),
                )
                .action(ReflectStage::Reasoning, reason_action())
                .action(ReflectStage::Reflecting, reflect_action())
                .tool(finish_task_tool());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_chain_shape() {
        let chain = reflect_event_chain();
        assert_eq!(chain.first(), Some(&ReflectEvent::Reason));
        assert_eq!(chain.last(), Some(&ReflectEvent::Finish));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ReflectStage::Reasoning.name(), "reasoning");
        assert_eq!(ReflectStage::Reflecting.name(), "reflecting");
    }

    #[tokio::test]
    async fn test_finish_task_tool_records_output() {
        use crate::task::states::{base_states, base_transitions};
        use crate::task::tree::TreeTask;
        use crate::task::Task;

        let task = Task::builder()
            .valid_states(base_states())
            .init_state(TaskState::Created)
            .transitions(base_transitions())
            .build()
            .unwrap();
        let handle = TreeTask::new(task, 3).into_handle();

        let output = finish_task_tool()
            .invoke(
                handle.clone(),
                serde_json::json!({"result": "forty-two"}),
                serde_json::Value::Null,
            )
            .await;
        assert!(!output.is_error);

        let guard = handle.lock().await;
        assert!(guard.is_completed());
        assert_eq!(guard.output(), &[ContentBlock::text("forty-two")]);
    }
}
