//! Human-in-the-loop review of tool calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::hooks::{ActHookPoint, HookOutcome};
use crate::context::RunContext;
use crate::error::EngineResult;
use crate::machine::{Event, State};
use crate::ports::HumanClient;
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;
use crate::types::message::{ContentBlock, Message, ToolCallRequest};

const APPROVAL_KEYWORDS: &[&str] = &["yes", "approve", "confirm", "agree", "ok"];

/// A human reviewer's reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HumanResponse {
    /// The reply text.
    pub message: String,
}

impl HumanResponse {
    /// Extract the response from a reply message.
    pub fn from_message(message: &Message) -> Self {
        Self {
            message: message.text(),
        }
    }

    /// Whether the reply reads as an approval.
    pub fn is_approved(&self) -> bool {
        let lowered = self.message.to_lowercase();
        APPROVAL_KEYWORDS
            .iter()
            .any(|keyword| lowered.contains(keyword))
    }
}

/// Pre-act hook asking a [`HumanClient`] to approve each tool call.
/// A rejection interferes with the reviewer's words, which the reasoning
/// action feeds back into the task context.
pub struct HumanReviewGate {
    client: Arc<dyn HumanClient>,
}

impl HumanReviewGate {
    pub fn new(client: Arc<dyn HumanClient>) -> Self {
        Self { client }
    }

    fn review_request(tool_call: &ToolCallRequest) -> Message {
        Message::user(format!(
            "Approve the pending tool call `{}` with arguments {}?",
            tool_call.name, tool_call.args
        ))
        .build()
    }
}

#[async_trait]
impl<S: State, E: Event> ActHookPoint<S, E> for HumanReviewGate {
    async fn invoke(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        _task: &TreeTaskHandle<S, E>,
        tool_call: &ToolCallRequest,
    ) -> EngineResult<HookOutcome> {
        if !self.client.is_valid(context) {
            return Ok(HookOutcome::Continue);
        }
        let reply = self
            .client
            .ask_human(context, queue, Self::review_request(tool_call))
            .await?;
        let response = HumanResponse::from_message(&reply);
        if response.is_approved() {
            info!(tool = %tool_call.name, "tool call approved by reviewer");
            Ok(HookOutcome::Continue)
        } else {
            info!(tool = %tool_call.name, "tool call rejected by reviewer");
            let blocks = if reply.content.is_empty() {
                vec![ContentBlock::text("the reviewer rejected the tool call")]
            } else {
                reply.content
            };
            Ok(HookOutcome::Interfere(blocks))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::states::{base_states, base_transitions, TaskEvent, TaskState};
    use crate::task::tree::TreeTask;
    use crate::task::Task;

    struct ScriptedReviewer {
        reply: String,
    }

    #[async_trait]
    impl HumanClient for ScriptedReviewer {
        fn is_valid(&self, _context: &RunContext) -> bool {
            true
        }

        async fn ask_human(
            &self,
            _context: &RunContext,
            _queue: &MessageQueue,
            _message: Message,
        ) -> EngineResult<Message> {
            Ok(Message::user(self.reply.clone()).build())
        }
    }

    fn task_handle() -> TreeTaskHandle<TaskState, TaskEvent> {
        let task = Task::builder()
            .valid_states(base_states())
            .init_state(TaskState::Created)
            .transitions(base_transitions())
            .build()
            .unwrap();
        TreeTask::new(task, 3).into_handle()
    }

    #[test]
    fn test_approval_keywords() {
        assert!(HumanResponse {
            message: "Yes, go ahead".into()
        }
        .is_approved());
        assert!(!HumanResponse {
            message: "absolutely not".into()
        }
        .is_approved());
    }

    #[tokio::test]
    async fn test_gate_outcomes() {
        let call = ToolCallRequest::new("call_1", "delete_file", serde_json::json!({}));
        let task = task_handle();

        let approve = HumanReviewGate::new(Arc::new(ScriptedReviewer {
            reply: "approve".into(),
        }));
        let outcome = ActHookPoint::<TaskState, TaskEvent>::invoke(
            &approve,
            &RunContext::new(),
            &MessageQueue::new(),
            &task,
            &call,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, HookOutcome::Continue));

        let reject = HumanReviewGate::new(Arc::new(ScriptedReviewer {
            reply: "please do not touch that file".into(),
        }));
        let outcome = ActHookPoint::<TaskState, TaskEvent>::invoke(
            &reject,
            &RunContext::new(),
            &MessageQueue::new(),
            &task,
            &call,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, HookOutcome::Interfere(_)));
    }
}
