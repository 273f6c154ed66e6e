//! Agent behavior: streaming round-trips, tool routing, hook interference,
//! and the reflect executor end to end.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;

use common::{titled_task, tool_call_reply, RecordingToolService, ScriptedLlm};
use tasktree::agent::{build_reflect_agent, Agent, ReflectStage, StepOutcome};
use tasktree::context::RunContext;
use tasktree::error::EngineError;
use tasktree::middleware::{HumanReviewGate, StreamRelayHook};
use tasktree::ports::{HumanClient, LanguageModel};
use tasktree::queue::MessageQueue;
use tasktree::settings::{AgentConfig, Settings};
use tasktree::task::{TaskEvent, TaskState};
use tasktree::types::{
    CompletionConfig, ContentBlock, Message, Role, StopReason, ToolCallRequest, ToolDescriptor,
    ToolOutput,
};
use tasktree::workflow::{StageAction, Workflow, WorkflowTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stage {
    Working,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StageEvent {
    Run,
    Finish,
}

/// A one-stage workflow whose action thinks once (optionally streaming)
/// and finishes.
fn thinking_agent(
    llm: Arc<dyn LanguageModel>,
    stream: bool,
) -> Agent<Stage, StageEvent, TaskState, TaskEvent> {
    let action: StageAction<Stage, StageEvent, TaskState, TaskEvent> = {
        let llm = llm.clone();
        Arc::new(move |agent, _workflow, context, queue, task| {
            let llm = llm.clone();
            async move {
                let config = CompletionConfig {
                    stream,
                    ..Default::default()
                };
                agent
                    .think(&context, &queue, &task, llm, Vec::new(), &config)
                    .await?;
                Ok(StageEvent::Finish)
            }
            .boxed()
        })
    };
    let agent = Agent::new("thinker", "test", None);
    agent
        .set_workflow_factory(Arc::new(move || {
            Workflow::builder("thinking")
                .valid_stages([Stage::Working, Stage::Finished])
                .init_stage(Stage::Working)
                .transition(Stage::Working, StageEvent::Run, Stage::Working)
                .transition(Stage::Working, StageEvent::Finish, Stage::Finished)
                .event_chain([StageEvent::Run, StageEvent::Finish])
                .action(Stage::Working, action.clone())
                .build()
        }))
        .unwrap();
    agent
}

#[tokio::test]
async fn test_streaming_round_trip() {
    // seven chunks plus the aggregated message reach the relay; the task
    // context grows by exactly one message
    let final_reply = Message::assistant("the full answer")
        .with_stop_reason(StopReason::Stop)
        .build();
    let llm = ScriptedLlm::streaming(vec![final_reply], 7);

    let mut agent = thinking_agent(llm, true);
    agent.add_post_think_hook(Arc::new(StreamRelayHook));
    let agent = Arc::new(agent);

    let task = titled_task("streaming");
    let queue = MessageQueue::new();
    agent
        .run_task_stream(RunContext::new(), queue.clone(), task.clone())
        .await
        .unwrap();

    let mut chunks = 0;
    let mut finals = 0;
    while let Ok(message) = queue.get_nowait() {
        if message.is_chunking {
            chunks += 1;
        } else {
            finals += 1;
            assert_eq!(message.text(), "the full answer");
        }
    }
    assert_eq!(chunks, 7);
    assert_eq!(finals, 1);

    let guard = task.lock().await;
    let messages = guard.context_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::Assistant);
    assert!(!messages[0].is_chunking);
}

#[tokio::test]
async fn test_non_streaming_think_appends_once() {
    let llm = ScriptedLlm::new(vec![Message::assistant("plain").build()]);
    let agent = Arc::new(thinking_agent(llm, false));
    let task = titled_task("plain");
    agent
        .run_task_stream(RunContext::new(), MessageQueue::new(), task.clone())
        .await
        .unwrap();
    assert_eq!(task.lock().await.context_messages().len(), 1);
}

/// Workflow with one local tool requiring the `local` tag.
fn tool_workflow() -> Workflow<Stage, StageEvent, TaskState, TaskEvent> {
    let tool = WorkflowTool::new(
        ToolDescriptor::new("local_echo", "Echo locally"),
        Arc::new(|_task, args, inject| {
            async move {
                Ok(ToolOutput::json(
                    serde_json::json!({"args": args, "inject": inject}),
                ))
            }
            .boxed()
        }),
    )
    .with_required_tags(["local"]);
    Workflow::builder("tools")
        .valid_stages([Stage::Working])
        .init_stage(Stage::Working)
        .transition(Stage::Working, StageEvent::Run, Stage::Working)
        .event_chain([StageEvent::Run])
        .tool(tool)
        .build()
        .unwrap()
}

fn tagged_task(tags: &[&str]) -> tasktree::task::TreeTaskHandle<TaskState, TaskEvent> {
    use tasktree::task::{base_states, base_transitions, Task, TaskDescriptor, TreeTask};
    let task = Task::builder()
        .valid_states(base_states())
        .init_state(TaskState::Created)
        .transitions(base_transitions())
        .descriptor(TaskDescriptor::new("tagged").with_tags(tags.iter().copied()))
        .build()
        .unwrap();
    TreeTask::new(task, 3).into_handle()
}

#[tokio::test]
async fn test_act_prefers_workflow_tools_and_checks_tags() {
    let agent: Arc<Agent<Stage, StageEvent, TaskState, TaskEvent>> =
        Arc::new(Agent::new("actor", "test", None));
    let workflow = Arc::new(tokio::sync::Mutex::new(tool_workflow()));
    let queue = MessageQueue::new();
    let ctx = RunContext::new();
    let call = ToolCallRequest::new("call_1", "local_echo", serde_json::json!({"q": 1}));

    // tags satisfied: the local tool runs and a TOOL message is appended
    let task = tagged_task(&["local", "extra"]);
    let outcome = agent
        .act(&ctx, &workflow, &queue, &call, &task, serde_json::Value::Null)
        .await
        .unwrap();
    match outcome {
        StepOutcome::Message(message) => {
            assert_eq!(message.role, Role::Tool);
            assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
            assert!(!message.is_error);
        }
        StepOutcome::Interfered(_) => panic!("unexpected interference"),
    }
    assert_eq!(task.lock().await.context_messages().len(), 1);

    // tags missing: the call is rejected before execution
    let untagged = tagged_task(&[]);
    let err = agent
        .act(
            &ctx,
            &workflow,
            &queue,
            &call,
            &untagged,
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ToolTagMismatch { .. }));
    assert!(untagged.lock().await.context_messages().is_empty());
}

#[tokio::test]
async fn test_act_falls_back_to_the_tool_service() {
    let service = Arc::new(RecordingToolService::default());
    let agent: Arc<Agent<Stage, StageEvent, TaskState, TaskEvent>> =
        Arc::new(Agent::new("actor", "test", Some(service.clone())));
    let workflow = Arc::new(tokio::sync::Mutex::new(tool_workflow()));
    let ctx: RunContext = [("trace_id", serde_json::json!("t-9"))].into_iter().collect();
    let call = ToolCallRequest::new("call_2", "remote_echo", serde_json::json!({"q": 2}));
    let task = tagged_task(&[]);

    let outcome = agent
        .act(
            &ctx,
            &workflow,
            &MessageQueue::new(),
            &call,
            &task,
            serde_json::Value::Null,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, StepOutcome::Message(_)));

    let calls = service.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "remote_echo");
    // the run context is injected into service arguments
    assert_eq!(calls[0].1["context"]["trace_id"], "t-9");
}

#[tokio::test]
async fn test_act_without_any_route_fails() {
    let agent: Arc<Agent<Stage, StageEvent, TaskState, TaskEvent>> =
        Arc::new(Agent::new("actor", "test", None));
    let workflow = Arc::new(tokio::sync::Mutex::new(tool_workflow()));
    let call = ToolCallRequest::new("call_3", "nowhere", serde_json::json!({}));
    let err = agent
        .act(
            &RunContext::new(),
            &workflow,
            &MessageQueue::new(),
            &call,
            &tagged_task(&[]),
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ToolNotFound(_)));
}

struct AlwaysReject;

#[async_trait::async_trait]
impl HumanClient for AlwaysReject {
    fn is_valid(&self, _context: &RunContext) -> bool {
        true
    }

    async fn ask_human(
        &self,
        _context: &RunContext,
        _queue: &MessageQueue,
        _message: Message,
    ) -> tasktree::error::EngineResult<Message> {
        Ok(Message::user("no, stop right there").build())
    }
}

#[tokio::test]
async fn test_review_gate_interferes_before_execution() {
    let mut agent: Agent<Stage, StageEvent, TaskState, TaskEvent> =
        Agent::new("actor", "test", None);
    agent.add_pre_act_hook(Arc::new(HumanReviewGate::new(Arc::new(AlwaysReject))));
    let agent = Arc::new(agent);

    let workflow = Arc::new(tokio::sync::Mutex::new(tool_workflow()));
    let call = ToolCallRequest::new("call_4", "local_echo", serde_json::json!({}));
    let task = tagged_task(&["local"]);
    let outcome = agent
        .act(
            &RunContext::new(),
            &workflow,
            &MessageQueue::new(),
            &call,
            &task,
            serde_json::Value::Null,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, StepOutcome::Interfered(_)));
    // nothing was executed or appended
    assert!(task.lock().await.context_messages().is_empty());
}

fn reflect_settings() -> Settings {
    Settings::default().with_agent(
        "executor",
        AgentConfig {
            agent_type: "reflect".to_string(),
            llm: HashMap::new(),
        },
    )
}

#[tokio::test]
async fn test_reflect_agent_finishes_on_flag() {
    // round one reasons, round two reflects with an explicit finish flag
    let llm = ScriptedLlm::new(vec![
        Message::assistant("working through the requirement")
            .with_stop_reason(StopReason::Stop)
            .build(),
        Message::assistant("all good\n<finish>TRUE</finish>")
            .with_stop_reason(StopReason::Stop)
            .build(),
    ]);
    let llms: HashMap<ReflectStage, Arc<dyn LanguageModel>> = HashMap::from([
        (
            ReflectStage::Reasoning,
            llm.clone() as Arc<dyn LanguageModel>,
        ),
        (ReflectStage::Reflecting, llm as Arc<dyn LanguageModel>),
    ]);

    let agent = Arc::new(
        build_reflect_agent("executor", &reflect_settings(), llms, None, None, None).unwrap(),
    );
    let task = titled_task("reflective");
    task.lock()
        .await
        .set_input(vec![ContentBlock::text("compute the answer")]);

    agent
        .run_task_stream(RunContext::new(), MessageQueue::new(), task.clone())
        .await
        .unwrap();

    let guard = task.lock().await;
    assert!(guard.is_completed());
    assert!(!guard.is_error());
    assert!(tasktree::types::blocks_text(guard.output()).contains("all good"));
}

#[tokio::test]
async fn test_reflect_agent_marks_error_on_failed_tool() {
    // the model calls an unknown tool; the service returns an error
    // result, the task is marked in error, and the workflow ends
    struct FailingService;
    #[async_trait::async_trait]
    impl tasktree::ports::ToolService for FailingService {
        async fn list_tools(
            &self,
        ) -> tasktree::error::EngineResult<Vec<ToolDescriptor>> {
            Ok(vec![ToolDescriptor::new("flaky", "fails")])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: serde_json::Value,
        ) -> tasktree::error::EngineResult<ToolOutput> {
            Ok(ToolOutput::error("downstream exploded"))
        }
    }

    let llm = ScriptedLlm::new(vec![tool_call_reply(vec![ToolCallRequest::new(
        "call_5",
        "flaky",
        serde_json::json!({}),
    )])]);
    let llms: HashMap<ReflectStage, Arc<dyn LanguageModel>> = HashMap::from([
        (
            ReflectStage::Reasoning,
            llm.clone() as Arc<dyn LanguageModel>,
        ),
        (ReflectStage::Reflecting, llm as Arc<dyn LanguageModel>),
    ]);
    let agent = Arc::new(
        build_reflect_agent(
            "executor",
            &reflect_settings(),
            llms,
            Some(Arc::new(FailingService)),
            None,
            None,
        )
        .unwrap(),
    );

    let task = titled_task("tool-user");
    agent
        .run_task_stream(RunContext::new(), MessageQueue::new(), task.clone())
        .await
        .unwrap();

    let guard = task.lock().await;
    assert!(guard.is_error());
    assert!(guard.error_info().unwrap().contains("downstream exploded"));
}

#[tokio::test]
async fn test_workflow_factory_yields_fresh_instances() {
    let llm = ScriptedLlm::new(vec![]);
    let agent = thinking_agent(llm, false);
    let first = agent.workflow().unwrap();
    let second = agent.workflow().unwrap();
    assert_eq!(first.current_stage(), Stage::Working);
    assert_eq!(second.current_stage(), Stage::Working);
    assert_ne!(first.id(), second.id());
}
