//! Hook points around the agent's operations.
//!
//! Eight ordered hook lists exist, pre/post for each of run-once, observe,
//! think, and act. A hook returns a [`HookOutcome`]: `Continue` to proceed,
//! or `Interfere` to hand control back to the reasoning action with
//! messages from outside the model loop (typically a human reviewer).
//! Interference is data, not an error: the reasoning action appends the
//! messages as a USER turn and re-enters the stage.

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::EngineResult;
use crate::machine::{Event, State};
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;
use crate::types::message::{ContentBlock, ToolCallRequest};

/// What a hook decided.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// Proceed normally.
    Continue,
    /// Break into the agent loop with the given content.
    Interfere(Vec<ContentBlock>),
}

/// Hook signature shared by run-once, observe, pre-think, and post-act
/// points.
#[async_trait]
pub trait TaskHookPoint<S: State, E: Event>: Send + Sync {
    async fn invoke(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome>;
}

/// Post-think hook; additionally receives the stream queue when the think
/// ran in streaming mode.
#[async_trait]
pub trait StreamHookPoint<S: State, E: Event>: Send + Sync {
    async fn invoke(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        stream_queue: Option<&MessageQueue>,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome>;
}

/// Pre-act hook; additionally receives the pending tool call.
#[async_trait]
pub trait ActHookPoint<S: State, E: Event>: Send + Sync {
    async fn invoke(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
        tool_call: &ToolCallRequest,
    ) -> EngineResult<HookOutcome>;
}

struct FnTaskHook<F>(F);

#[async_trait]
impl<S, E, F> TaskHookPoint<S, E> for FnTaskHook<F>
where
    S: State,
    E: Event,
    F: Fn(&RunContext, &MessageQueue, &TreeTaskHandle<S, E>) -> EngineResult<HookOutcome>
        + Send
        + Sync,
{
    async fn invoke(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        (self.0)(context, queue, task)
    }
}

/// Wrap a synchronous closure as a [`TaskHookPoint`].
pub fn task_hook<S, E, F>(f: F) -> std::sync::Arc<dyn TaskHookPoint<S, E>>
where
    S: State,
    E: Event,
    F: Fn(&RunContext, &MessageQueue, &TreeTaskHandle<S, E>) -> EngineResult<HookOutcome>
        + Send
        + Sync
        + 'static,
{
    std::sync::Arc::new(FnTaskHook(f))
}

struct FnActHook<F>(F);

#[async_trait]
impl<S, E, F> ActHookPoint<S, E> for FnActHook<F>
where
    S: State,
    E: Event,
    F: Fn(
            &RunContext,
            &MessageQueue,
            &TreeTaskHandle<S, E>,
            &ToolCallRequest,
        ) -> EngineResult<HookOutcome>
        + Send
        + Sync,
{
    async fn invoke(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
        tool_call: &ToolCallRequest,
    ) -> EngineResult<HookOutcome> {
        (self.0)(context, queue, task, tool_call)
    }
}

/// Wrap a synchronous closure as an [`ActHookPoint`].
pub fn act_hook<S, E, F>(f: F) -> std::sync::Arc<dyn ActHookPoint<S, E>>
where
    S: State,
    E: Event,
    F: Fn(
            &RunContext,
            &MessageQueue,
            &TreeTaskHandle<S, E>,
            &ToolCallRequest,
        ) -> EngineResult<HookOutcome>
        + Send
        + Sync
        + 'static,
{
    std::sync::Arc::new(FnActHook(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::states::{base_states, base_transitions, TaskEvent, TaskState};
    use crate::task::tree::TreeTask;
    use crate::task::Task;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fn_hook_invocation() {
        let calls = Arc::new(AtomicU32::new(0));
        let hook = {
            let calls = calls.clone();
            task_hook(move |_ctx, _queue, _task: &TreeTaskHandle<TaskState, TaskEvent>| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(HookOutcome::Continue)
            })
        };
        let task = Task::builder()
            .valid_states(base_states())
            .init_state(TaskState::Created)
            .transitions(base_transitions())
            .build()
            .unwrap();
        let handle = TreeTask::new(task, 3).into_handle();
        let outcome = hook
            .invoke(&RunContext::new(), &MessageQueue::new(), &handle)
            .await
            .unwrap();
        assert!(matches!(outcome, HookOutcome::Continue));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
