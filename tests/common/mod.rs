//! Shared test doubles: a scripted language model, a recording tool
//! service, and a stub executor agent driving the default task graph.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;

use tasktree::agent::Agent;
use tasktree::error::{EngineError, EngineResult};
use tasktree::ports::{LanguageModel, ToolService};
use tasktree::queue::MessageQueue;
use tasktree::task::{base_states, base_transitions, Task, TaskDescriptor, TaskEvent, TaskState};
use tasktree::types::{
    CompletionConfig, ContentBlock, Message, StopReason, ToolDescriptor, ToolOutput,
};
use tasktree::workflow::{StageAction, Workflow};

/// Stages of the minimal single-step executor workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStage {
    Working,
    Finished,
}

/// Events of the minimal executor workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecEvent {
    Run,
    Finish,
}

/// A language model replaying scripted messages. With a stream queue, it
/// emits `chunk_count` text chunks plus the final aggregated message
/// before returning it.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Message>>,
    pub chunk_count: usize,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            chunk_count: 0,
        })
    }

    pub fn streaming(replies: Vec<Message>, chunk_count: usize) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            chunk_count,
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn completion(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDescriptor>,
        stream_queue: Option<MessageQueue>,
        _config: &CompletionConfig,
    ) -> EngineResult<Message> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Completion("scripted model ran out of replies".into()))?;
        if let Some(stream) = stream_queue {
            for index in 0..self.chunk_count {
                stream
                    .put(Message::chunk(format!("chunk {index}")).build())
                    .await?;
            }
            let mut aggregated = reply.clone();
            aggregated.is_chunking = false;
            stream.put(aggregated).await?;
        }
        Ok(reply)
    }
}

/// A tool service recording every call and answering with a fixed output.
#[derive(Default)]
pub struct RecordingToolService {
    pub calls: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl ToolService for RecordingToolService {
    async fn list_tools(&self) -> EngineResult<Vec<ToolDescriptor>> {
        Ok(vec![
            ToolDescriptor::new("remote_echo", "Echo the arguments back"),
            ToolDescriptor::new("restricted", "Needs the web tag").with_tags(["web"]),
        ])
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> EngineResult<ToolOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        Ok(ToolOutput::json(
            serde_json::json!({"tool": name, "echo": arguments}),
        ))
    }
}

/// Build a tree task over the default graph with the given title.
pub fn titled_task(title: &str) -> tasktree::task::TreeTaskHandle<TaskState, TaskEvent> {
    let task = Task::builder()
        .valid_states(base_states())
        .init_state(TaskState::Created)
        .transitions(base_transitions())
        .descriptor(TaskDescriptor::new("test_task"))
        .title(title)
        .build()
        .unwrap();
    tasktree::task::TreeTask::new(task, 5).into_handle()
}

/// Build an executor agent whose single action completes the task, or
/// marks it in error when the task title is in `fail_titles`.
pub fn stub_executor(
    fail_titles: HashSet<String>,
) -> Arc<Agent<ExecStage, ExecEvent, TaskState, TaskEvent>> {
    let action: StageAction<ExecStage, ExecEvent, TaskState, TaskEvent> = {
        let fail_titles = fail_titles.clone();
        Arc::new(move |_agent, _workflow, _context, _queue, task| {
            let fail_titles = fail_titles.clone();
            async move {
                let mut guard = task.lock().await;
                if fail_titles.contains(guard.title()) {
                    let title = guard.title().to_string();
                    guard.set_error(format!("executor failed on `{}`", title));
                } else {
                    guard.set_completed(vec![ContentBlock::text("done")]);
                }
                Ok(ExecEvent::Finish)
            }
            .boxed()
        })
    };

    let agent = Agent::new("stub-executor", "test", None);
    agent
        .set_workflow_factory(Arc::new(move || {
            Workflow::builder("stub_workflow")
                .valid_stages([ExecStage::Working, ExecStage::Finished])
                .init_stage(ExecStage::Working)
                .transition(ExecStage::Working, ExecEvent::Run, ExecStage::Working)
                .transition(ExecStage::Working, ExecEvent::Finish, ExecStage::Finished)
                .event_chain([ExecEvent::Run, ExecEvent::Finish])
                .action(ExecStage::Working, action.clone())
                .build()
        }))
        .unwrap();
    Arc::new(agent)
}

/// An assistant message carrying tool calls.
pub fn tool_call_reply(calls: Vec<tasktree::types::ToolCallRequest>) -> Message {
    Message::assistant("calling tools")
        .with_tool_calls(calls)
        .with_stop_reason(StopReason::ToolCall)
        .build()
}
