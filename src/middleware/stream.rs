//! Streaming relay: the default post-think hook.

use std::time::Duration;

use async_trait::async_trait;

use crate::agent::hooks::{HookOutcome, StreamHookPoint};
use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, State};
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;

const RELAY_POLL: Duration = Duration::from_millis(100);

/// Relays every chunk from the internal stream queue to the caller's
/// queue until the stream queue closes. Attach as a post-think hook on a
/// streaming agent; in non-streaming thinks it is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamRelayHook;

#[async_trait]
impl<S: State, E: Event> StreamHookPoint<S, E> for StreamRelayHook {
    async fn invoke(
        &self,
        _context: &RunContext,
        queue: &MessageQueue,
        stream_queue: Option<&MessageQueue>,
        _task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        let Some(stream) = stream_queue else {
            return Ok(HookOutcome::Continue);
        };
        loop {
            match stream.get_timeout(RELAY_POLL).await {
                Ok(chunk) => queue.put(chunk).await?,
                Err(EngineError::Timeout(_)) => {
                    if stream.is_closed() && stream.is_empty() {
                        break;
                    }
                }
                Err(EngineError::QueueClosed) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(HookOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::states::{base_states, base_transitions, TaskEvent, TaskState};
    use crate::task::tree::TreeTask;
    use crate::task::Task;
    use crate::types::message::Message;

    fn task_handle() -> TreeTaskHandle<TaskState, TaskEvent> {
        let task = Task::builder()
            .valid_states(base_states())
            .init_state(TaskState::Created)
            .transitions(base_transitions())
            .build()
            .unwrap();
        TreeTask::new(task, 3).into_handle()
    }

    #[tokio::test]
    async fn test_relays_until_close() {
        let user_queue = MessageQueue::new();
        let stream = MessageQueue::new();
        for i in 0..3 {
            stream
                .put(Message::chunk(format!("part {i}")).build())
                .await
                .unwrap();
        }
        stream.close();

        let hook = StreamRelayHook;
        let outcome = hook
            .invoke(
                &RunContext::new(),
                &user_queue,
                Some(&stream),
                &task_handle(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, HookOutcome::Continue));
        assert_eq!(user_queue.len(), 3);
    }

    #[tokio::test]
    async fn test_no_stream_is_a_noop() {
        let user_queue = MessageQueue::new();
        let hook = StreamRelayHook;
        hook.invoke(&RunContext::new(), &user_queue, None, &task_handle())
            .await
            .unwrap();
        assert!(user_queue.is_empty());
    }
}
