//! Step and token budgets for agent runs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::agent::hooks::{HookOutcome, TaskHookPoint};
use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, State};
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;

/// Pre-run-once hook failing the run after `limit` rounds.
#[derive(Debug)]
pub struct MaxStepCounter {
    limit: u64,
    steps: AtomicU64,
}

impl MaxStepCounter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            steps: AtomicU64::new(0),
        }
    }

    /// Rounds counted so far.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    /// Restart the budget.
    pub fn reset(&self) {
        self.steps.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: State, E: Event> TaskHookPoint<S, E> for MaxStepCounter {
    async fn invoke(
        &self,
        _context: &RunContext,
        _queue: &MessageQueue,
        _task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        let steps = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        if steps > self.limit {
            return Err(EngineError::MaxStepsExceeded { limit: self.limit });
        }
        Ok(HookOutcome::Continue)
    }
}

/// Pre-run-once hook failing the run once the tokens reported in the
/// task's current context exceed `limit`.
#[derive(Debug)]
pub struct TokenStepCounter {
    limit: u64,
}

impl TokenStepCounter {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl<S: State, E: Event> TaskHookPoint<S, E> for TokenStepCounter {
    async fn invoke(
        &self,
        _context: &RunContext,
        _queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        let messages = { task.lock().await.context_messages() };
        let spent: i64 = messages
            .iter()
            .filter_map(|message| message.usage)
            .map(|usage| usage.total_tokens.max(0))
            .sum();
        if spent as u64 > self.limit {
            return Err(EngineError::MaxStepsExceeded { limit: self.limit });
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
    use crate::types::message::{CompletionUsage, Message};

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
    async fn test_max_step_counter_trips_past_limit() {
        let counter = MaxStepCounter::new(2);
        let ctx = RunContext::new();
        let queue = MessageQueue::new();
        let task = task_handle();

        for _ in 0..2 {
            let outcome =
                TaskHookPoint::<TaskState, TaskEvent>::invoke(&counter, &ctx, &queue, &task)
                    .await
                    .unwrap();
            assert!(matches!(outcome, HookOutcome::Continue));
        }
        let err = TaskHookPoint::<TaskState, TaskEvent>::invoke(&counter, &ctx, &queue, &task)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MaxStepsExceeded { limit: 2 }));

        counter.reset();
        assert_eq!(counter.steps(), 0);
    }

    #[tokio::test]
    async fn test_token_counter_reads_context_usage() {
        let counter = TokenStepCounter::new(100);
        let ctx = RunContext::new();
        let queue = MessageQueue::new();
        let task = task_handle();

        {
            let mut guard = task.lock().await;
            guard
                .append_context(Message::user("q").build())
                .unwrap();
            guard
                .append_context(
                    Message::assistant("a")
                        .with_usage(CompletionUsage::new(90, 30))
                        .build(),
                )
                .unwrap();
        }

        let err = TaskHookPoint::<TaskState, TaskEvent>::invoke(&counter, &ctx, &queue, &task)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MaxStepsExceeded { limit: 100 }));
    }
}
