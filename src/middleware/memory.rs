//! Memory middleware: recall before a run, persist after it.
//!
//! State memories live in a KV store under a
//! `user:project:trace:task` key; episode memories live in a vector store
//! and are recalled by similarity against the task input.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::agent::hooks::{HookOutcome, TaskHookPoint};
use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, State};
use crate::ports::{KvStore, VectorStore};
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;
use crate::types::memory::{EpisodeMemory, StateMemory};
use crate::types::message::{ContentBlock, Message, MessageBuilder, Role};

/// Distills a context history into state-memory content; `None` means
/// there is nothing worth remembering.
pub type StateExtractor = Arc<
    dyn Fn(Vec<Message>) -> BoxFuture<'static, EngineResult<Option<Vec<ContentBlock>>>>
        + Send
        + Sync,
>;

/// A recalled memory enters the context as SYSTEM while the context is
/// still in its system prefix, as USER afterwards.
fn recall_builder(last_role: Option<Role>, content: Vec<ContentBlock>) -> MessageBuilder {
    let role = match last_role {
        None | Some(Role::System) => Role::System,
        _ => Role::User,
    };
    Message::with_content(role, content)
}

fn memory_key<S: State, E: Event>(
    context: &RunContext,
    task: &crate::task::tree::TreeTask<S, E>,
) -> EngineResult<String> {
    let user_id = context
        .get_str("user_id")
        .ok_or_else(|| EngineError::configuration("user_id is required in the run context"))?;
    let project_id = context
        .get_str("project_id")
        .ok_or_else(|| EngineError::configuration("project_id is required in the run context"))?;
    let trace_id = context
        .get_str("trace_id")
        .ok_or_else(|| EngineError::configuration("trace_id is required in the run context"))?;
    Ok(format!("{user_id}:{project_id}:{trace_id}:{}", task.id()))
}

/// State-memory middleware over a KV store.
#[derive(Clone)]
pub struct StateMemoryHooks<S, E> {
    store: Arc<dyn KvStore<StateMemory>>,
    extractor: StateExtractor,
    _marker: PhantomData<fn() -> (S, E)>,
}

impl<S: State, E: Event> StateMemoryHooks<S, E> {
    pub fn new(store: Arc<dyn KvStore<StateMemory>>, extractor: StateExtractor) -> Self {
        Self {
            store,
            extractor,
            _marker: PhantomData,
        }
    }

    /// Pre-run-once hook: inject the remembered state into the context.
    pub fn recall_hook(&self) -> Arc<dyn TaskHookPoint<S, E>> {
        Arc::new(StateRecall {
            hooks: self.clone(),
        })
    }

    /// Post-run-once hook: extract and persist the state.
    pub fn persist_hook(&self) -> Arc<dyn TaskHookPoint<S, E>> {
        Arc::new(StatePersist {
            hooks: self.clone(),
        })
    }
}

struct StateRecall<S, E> {
    hooks: StateMemoryHooks<S, E>,
}

#[async_trait]
impl<S: State, E: Event> TaskHookPoint<S, E> for StateRecall<S, E> {
    async fn invoke(
        &self,
        context: &RunContext,
        _queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        let key = { memory_key(context, &*task.lock().await)? };
        let Some(memory) = self.hooks.store.search(&key).await? else {
            return Ok(HookOutcome::Continue);
        };
        debug!(key = %key, "state memory recalled");
        let mut guard = task.lock().await;
        let last_role = guard.context().and_then(|ctx| ctx.last_role());
        guard.append_context(recall_builder(last_role, memory.record.content).build())?;
        Ok(HookOutcome::Continue)
    }
}

struct StatePersist<S, E> {
    hooks: StateMemoryHooks<S, E>,
}

#[async_trait]
impl<S: State, E: Event> TaskHookPoint<S, E> for StatePersist<S, E> {
    async fn invoke(
        &self,
        context: &RunContext,
        _queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        let (key, task_id, messages) = {
            let guard = task.lock().await;
            (
                memory_key(context, &*guard)?,
                guard.id().to_string(),
                guard.context_messages(),
            )
        };
        if messages.is_empty() {
            return Ok(HookOutcome::Continue);
        }
        let Some(content) = (self.hooks.extractor)(messages).await? else {
            return Ok(HookOutcome::Continue);
        };
        self.hooks
            .store
            .add(&key, StateMemory::new(task_id, content))
            .await?;
        debug!(key = %key, "state memory persisted");
        Ok(HookOutcome::Continue)
    }
}

/// Episode-memory middleware over a vector store.
#[derive(Clone)]
pub struct EpisodeMemoryHooks<S, E> {
    store: Arc<dyn VectorStore<EpisodeMemory>>,
    top_k: usize,
    threshold: f32,
    _marker: PhantomData<fn() -> (S, E)>,
}

impl<S: State, E: Event> EpisodeMemoryHooks<S, E> {
    pub fn new(
        store: Arc<dyn VectorStore<EpisodeMemory>>,
        top_k: usize,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            top_k,
            threshold,
            _marker: PhantomData,
        }
    }

    /// Pre-run-once hook: recall similar episodes into the context.
    pub fn recall_hook(&self) -> Arc<dyn TaskHookPoint<S, E>> {
        Arc::new(EpisodeRecall {
            hooks: self.clone(),
        })
    }

    /// Post-run-once hook: persist this round as an episode.
    pub fn persist_hook(&self) -> Arc<dyn TaskHookPoint<S, E>> {
        Arc::new(EpisodePersist {
            hooks: self.clone(),
        })
    }
}

struct EpisodeRecall<S, E> {
    hooks: EpisodeMemoryHooks<S, E>,
}

#[async_trait]
impl<S: State, E: Event> TaskHookPoint<S, E> for EpisodeRecall<S, E> {
    async fn invoke(
        &self,
        _context: &RunContext,
        _queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        let query = { task.lock().await.input().to_vec() };
        if query.is_empty() {
            return Ok(HookOutcome::Continue);
        }
        let episodes = self
            .hooks
            .store
            .search(query, self.hooks.top_k, self.hooks.threshold, None)
            .await?;
        if episodes.is_empty() {
            return Ok(HookOutcome::Continue);
        }

        let mut blocks = vec![ContentBlock::text(
            "Episodes from earlier runs that look relevant:",
        )];
        for (episode, score) in &episodes {
            blocks.push(ContentBlock::text(format!(
                "[{:.2}] {}",
                score, episode.summary
            )));
            blocks.extend(episode.record.content.clone());
        }
        debug!(recalled = episodes.len(), "episode memories recalled");

        let mut guard = task.lock().await;
        let last_role = guard.context().and_then(|ctx| ctx.last_role());
        guard.append_context(recall_builder(last_role, blocks).build())?;
        Ok(HookOutcome::Continue)
    }
}

struct EpisodePersist<S, E> {
    hooks: EpisodeMemoryHooks<S, E>,
}

#[async_trait]
impl<S: State, E: Event> TaskHookPoint<S, E> for EpisodePersist<S, E> {
    async fn invoke(
        &self,
        _context: &RunContext,
        _queue: &MessageQueue,
        task: &TreeTaskHandle<S, E>,
    ) -> EngineResult<HookOutcome> {
        let (task_id, title, messages) = {
            let guard = task.lock().await;
            (
                guard.id().to_string(),
                guard.title().to_string(),
                guard.context_messages(),
            )
        };
        if messages.is_empty() {
            return Ok(HookOutcome::Continue);
        }
        let mut content = Vec::new();
        for message in &messages {
            let text = message.text();
            if !text.is_empty() {
                content.push(ContentBlock::text(format!("{:?}: {text}", message.role)));
            }
        }
        self.hooks
            .store
            .add(EpisodeMemory::new(task_id, title, content))
            .await?;
        Ok(HookOutcome::Continue)
    }
}
