//! The scheduler: drives a task's outer state machine to a terminal state.
//!
//! A scheduler owns no task. It is configured with end states, per-state
//! event producers (`on_state`), per-transition side effects
//! (`on_state_changed`), and a revisit bound, then validated once by
//! [`Scheduler::compile`]: every non-end state must be able to reach an
//! end state, either without cycles (`max_revisit_count < 0`) or within
//! the revisit bound (`max_revisit_count >= 0`). Only a compiled scheduler
//! may drive tasks.

pub mod tree;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};
use crate::machine::{Event, State};
use crate::queue::MessageQueue;
use crate::task::tree::TreeTaskHandle;

pub use tree::{build_base_scheduler, tree_on_state_changed_fn, tree_on_state_fn};

/// Per-state event producer: runs the work of a state and returns the
/// event driving the task onwards. May recurse into the scheduler.
pub type OnStateFn<S, E> = Arc<
    dyn Fn(
            Arc<Scheduler<S, E>>,
            RunContext,
            MessageQueue,
            TreeTaskHandle<S, E>,
        ) -> BoxFuture<'static, EngineResult<E>>
        + Send
        + Sync,
>;

/// Per-transition side effect, keyed by `(previous, next)` state pair.
pub type OnStateChangedFn<S, E> = Arc<
    dyn Fn(
            Arc<Scheduler<S, E>>,
            RunContext,
            MessageQueue,
            TreeTaskHandle<S, E>,
        ) -> BoxFuture<'static, EngineResult<()>>
        + Send
        + Sync,
>;

enum StateCheck {
    Ok,
    Cycle,
    Unreachable,
}

/// A compiled task scheduler over states `S` and events `E`.
pub struct Scheduler<S: State, E: Event> {
    end_states: HashSet<S>,
    on_state_fn: HashMap<S, OnStateFn<S, E>>,
    on_state_changed_fn: HashMap<(S, S), OnStateChangedFn<S, E>>,
    max_revisit_count: i32,
    compiled: bool,
}

impl<S: State, E: Event> std::fmt::Debug for Scheduler<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("end_states", &self.end_states)
            .field("max_revisit_count", &self.max_revisit_count)
            .field("compiled", &self.compiled)
            .finish()
    }
}

impl<S: State, E: Event> Scheduler<S, E> {
    /// Create an uncompiled scheduler. Call [`compile`](Self::compile)
    /// before scheduling.
    pub fn new(
        end_states: HashSet<S>,
        on_state_fn: HashMap<S, OnStateFn<S, E>>,
        on_state_changed_fn: HashMap<(S, S), OnStateChangedFn<S, E>>,
        max_revisit_count: i32,
    ) -> Self {
        Self {
            end_states,
            on_state_fn,
            on_state_changed_fn,
            max_revisit_count,
            compiled: false,
        }
    }

    /// Create, compile, and share a scheduler in one step.
    pub fn compiled(
        end_states: HashSet<S>,
        on_state_fn: HashMap<S, OnStateFn<S, E>>,
        on_state_changed_fn: HashMap<(S, S), OnStateChangedFn<S, E>>,
        max_revisit_count: i32,
    ) -> EngineResult<Arc<Self>> {
        let mut scheduler = Self::new(
            end_states,
            on_state_fn,
            on_state_changed_fn,
            max_revisit_count,
        );
        scheduler.compile()?;
        Ok(Arc::new(scheduler))
    }

    /// The configured end states.
    pub fn end_states(&self) -> HashSet<S> {
        self.end_states.clone()
    }

    /// The configured revisit bound; negative means acyclic mode.
    pub fn max_revisit_count(&self) -> i32 {
        self.max_revisit_count
    }

    /// Whether [`compile`](Self::compile) succeeded.
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// The event producer registered for `state`.
    pub fn on_state_handler(&self, state: S) -> Option<OnStateFn<S, E>> {
        self.on_state_fn.get(&state).cloned()
    }

    /// The side effect registered for a transition.
    pub fn on_state_changed_handler(&self, transition: (S, S)) -> Option<OnStateChangedFn<S, E>> {
        self.on_state_changed_fn.get(&transition).cloned()
    }

    /// Validate the configured state graph. Fails fast on:
    ///
    /// - re-compilation;
    /// - empty end-state set or empty transition map;
    /// - an end state never referenced by any transition;
    /// - a non-end state with outgoing transitions but no `on_state`
    ///   handler (the state could never produce an event);
    /// - in acyclic mode, any cycle among non-end states, or a non-end
    ///   state that cannot reach an end state;
    /// - in bounded-revisit mode, a non-end state that cannot reach an
    ///   end state within the revisit bound.
    pub fn compile(&mut self) -> EngineResult<()> {
        if self.compiled {
            return Err(EngineError::AlreadyCompiled);
        }

        let acyclic = self.max_revisit_count < 0;
        info!(
            mode = if acyclic { "acyclic" } else { "bounded-revisit" },
            max_revisit_count = self.max_revisit_count,
            "compiling scheduler"
        );

        if self.end_states.is_empty() {
            return Err(EngineError::compile(
                "no end states configured; the scheduler could never terminate",
            ));
        }

        let mut all_states: HashSet<S> = HashSet::new();
        for (from, to) in self.on_state_changed_fn.keys() {
            all_states.insert(*from);
            all_states.insert(*to);
        }
        if all_states.is_empty() {
            return Err(EngineError::compile("no state transitions configured"));
        }

        for end_state in &self.end_states {
            if !all_states.contains(end_state) {
                return Err(EngineError::compile(format!(
                    "end state {end_state:?} is not referenced by any transition and can \
                     never be reached"
                )));
            }
        }

        let mut adjacency: HashMap<S, HashSet<S>> = HashMap::new();
        for (from, to) in self.on_state_changed_fn.keys() {
            adjacency.entry(*from).or_default().insert(*to);
        }
        debug!(states = ?all_states, "scheduler state graph");

        let mut missing_handlers: Vec<S> = adjacency
            .keys()
            .copied()
            .filter(|state| {
                !self.end_states.contains(state) && !self.on_state_fn.contains_key(state)
            })
            .collect();
        if !missing_handlers.is_empty() {
            missing_handlers.sort_by_key(|state| format!("{state:?}"));
            return Err(EngineError::MissingOnStateHandler(format!(
                "{missing_handlers:?}"
            )));
        }

        let mut cycle_states: Vec<S> = Vec::new();
        let mut unreachable_states: Vec<S> = Vec::new();
        for state in &all_states {
            if self.end_states.contains(state) {
                continue;
            }
            match self.check_state(*state, &adjacency, acyclic) {
                StateCheck::Ok => {}
                StateCheck::Cycle => cycle_states.push(*state),
                StateCheck::Unreachable => unreachable_states.push(*state),
            }
        }
        if !cycle_states.is_empty() || !unreachable_states.is_empty() {
            cycle_states.sort_by_key(|state| format!("{state:?}"));
            unreachable_states.sort_by_key(|state| format!("{state:?}"));
            let mut parts = Vec::new();
            if !cycle_states.is_empty() {
                parts.push(format!(
                    "states {cycle_states:?} sit on a cycle, which acyclic mode forbids"
                ));
            }
            if !unreachable_states.is_empty() {
                parts.push(format!(
                    "states {unreachable_states:?} cannot reach an end state under the \
                     configured bound"
                ));
            }
            return Err(EngineError::compile(parts.join("; ")));
        }

        self.compiled = true;
        info!("scheduler compiled");
        Ok(())
    }

    /// BFS from `start`, either rejecting revisits (acyclic mode) or
    /// bounding them by `max_revisit_count`.
    fn check_state(&self, start: S, adjacency: &HashMap<S, HashSet<S>>, acyclic: bool) -> StateCheck {
        if acyclic {
            let mut visited: HashSet<S> = HashSet::new();
            let mut queue: VecDeque<S> = VecDeque::new();
            visited.insert(start);
            queue.push_back(start);
            while let Some(current) = queue.pop_front() {
                if self.end_states.contains(&current) {
                    return StateCheck::Ok;
                }
                for next in adjacency.get(&current).into_iter().flatten() {
                    if visited.contains(next) {
                        return StateCheck::Cycle;
                    }
                    visited.insert(*next);
                    queue.push_back(*next);
                }
            }
            StateCheck::Unreachable
        } else {
            // a state may be entered 1 + max_revisit_count times: the
            // first entry plus the allowed revisits
            let max_entries = self.max_revisit_count as u32 + 1;
            let mut visit_counts: HashMap<S, u32> = HashMap::new();
            let mut queue: VecDeque<S> = VecDeque::new();
            visit_counts.insert(start, 1);
            queue.push_back(start);
            while let Some(current) = queue.pop_front() {
                if self.end_states.contains(&current) {
                    return StateCheck::Ok;
                }
                if visit_counts.get(&current).copied().unwrap_or(0) > max_entries {
                    continue;
                }
                for next in adjacency.get(&current).into_iter().flatten() {
                    let next_count = visit_counts.get(next).copied().unwrap_or(0) + 1;
                    if next_count <= max_entries {
                        visit_counts.insert(*next, next_count);
                        queue.push_back(*next);
                    }
                }
            }
            StateCheck::Unreachable
        }
    }

    /// Drive `task` until its state is one of the end states.
    ///
    /// Each iteration runs the current state's event producer, applies the
    /// produced event to the task's own machine, runs the matching
    /// transition side effect, and re-reads the state (the side effect may
    /// have reset the task).
    pub fn schedule(
        self: Arc<Self>,
        context: RunContext,
        queue: MessageQueue,
        task: TreeTaskHandle<S, E>,
    ) -> BoxFuture<'static, EngineResult<()>> {
        let scheduler = self;
        async move {
            if !scheduler.compiled {
                return Err(EngineError::configuration(
                    "scheduler is not compiled; call compile() first",
                ));
            }

            let (mut current, valid_states, task_id) = {
                let guard = task.lock().await;
                (
                    guard.current_state(),
                    guard.valid_states(),
                    guard.id().to_string(),
                )
            };

            if scheduler.end_states.contains(&current) {
                info!(task = %task_id, state = ?current, "task already terminal, nothing to do");
                return Ok(());
            }

            // the task's graph must be fully covered by this scheduler
            let mut graph_states: HashSet<S> = HashSet::new();
            for (from, to) in scheduler.on_state_changed_fn.keys() {
                graph_states.insert(*from);
                graph_states.insert(*to);
            }
            let mut mismatched: Vec<S> = valid_states
                .iter()
                .copied()
                .filter(|state| {
                    !scheduler.end_states.contains(state)
                        && (!graph_states.contains(state)
                            || !scheduler.on_state_fn.contains_key(state))
                })
                .collect();
            if !mismatched.is_empty() {
                mismatched.sort_by_key(|state| format!("{state:?}"));
                return Err(EngineError::TaskSchedulerMismatch(format!(
                    "task states {mismatched:?} are not covered by the scheduler's transition \
                     graph and on-state handlers"
                )));
            }

            {
                task.lock()
                    .await
                    .set_max_revisit_limit(scheduler.max_revisit_count);
            }

            while !scheduler.end_states.contains(&current) {
                info!(task = %task_id, state = ?current, "scheduling");
                let handler = scheduler
                    .on_state_fn
                    .get(&current)
                    .cloned()
                    .ok_or_else(|| EngineError::MissingOnStateHandler(format!("{current:?}")))?;
                let event = handler(
                    scheduler.clone(),
                    context.clone(),
                    queue.clone(),
                    task.clone(),
                )
                .await?;

                {
                    task.lock().await.handle_event(event).await?;
                }
                let next = { task.lock().await.current_state() };

                if let Some(callback) = scheduler.on_state_changed_fn.get(&(current, next)).cloned()
                {
                    callback(
                        scheduler.clone(),
                        context.clone(),
                        queue.clone(),
                        task.clone(),
                    )
                    .await?;
                }

                // the callback may have mutated the task (e.g. reset)
                current = { task.lock().await.current_state() };
                info!(task = %task_id, state = ?current, "state updated");
            }
            Ok(())
        }
        .boxed()
    }
}
