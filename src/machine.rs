//! Generic compiled finite state machine.
//!
//! [`StateMachine`] validates its transition table at construction and is
//! frozen afterwards: events are applied through [`StateMachine::apply`],
//! which commits the state change, bumps the visit counter, and hands back
//! the transition hook for the embedding type (task, workflow) to await.
//! Splitting "apply" from "await the hook" is what lets hooks receive a
//! `&mut` borrow of their owner without ever re-entering the machine.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Marker for machine states: plain copyable enum-like values.
pub trait State: Copy + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> State for T {}

/// Marker for machine events.
pub trait Event: Copy + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> Event for T {}

/// A callback attached to a transition, executed against the machine's
/// owner after the state change is committed.
#[async_trait]
pub trait TransitionHook<X: Send>: Send + Sync {
    async fn run(&self, target: &mut X);
}

/// Shared handle to a transition hook.
pub type HookHandle<X> = Arc<dyn TransitionHook<X>>;

struct FnHook<F>(F);

#[async_trait]
impl<X, F> TransitionHook<X> for FnHook<F>
where
    X: Send,
    F: Fn(&mut X) + Send + Sync,
{
    async fn run(&self, target: &mut X) {
        (self.0)(target);
    }
}

/// Wrap a synchronous closure as a [`TransitionHook`].
pub fn sync_hook<X, F>(f: F) -> HookHandle<X>
where
    X: Send,
    F: Fn(&mut X) + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

/// A single entry of the transition table.
#[derive(Clone)]
pub struct Transition<S, H> {
    /// Target state.
    pub to: S,
    /// Optional hook run after the transition commits.
    pub hook: Option<H>,
}

impl<S, H> Transition<S, H> {
    /// Transition without a hook.
    pub fn to(to: S) -> Self {
        Self { to, hook: None }
    }

    /// Transition with a hook.
    pub fn with_hook(to: S, hook: H) -> Self {
        Self {
            to,
            hook: Some(hook),
        }
    }
}

/// A compiled finite state machine over states `S` and events `E`.
///
/// `H` is the hook handle type supplied by the embedding layer; the machine
/// itself never executes hooks.
pub struct StateMachine<S, E, H> {
    id: String,
    valid_states: HashSet<S>,
    init_state: S,
    transitions: HashMap<(S, E), Transition<S, H>>,
    current_state: S,
    visit_counts: HashMap<S, u32>,
    compiled: bool,
}

impl<S: State, E: Event, H: Clone> StateMachine<S, E, H> {
    /// Build and compile a machine. Compilation checks:
    ///
    /// 1. `valid_states` is non-empty;
    /// 2. `init_state` is a valid state;
    /// 3. at least one transition is configured;
    /// 4. every state mentioned by a transition is a valid state.
    ///
    /// Reachability of end states is the scheduler's concern, not the
    /// machine's.
    pub fn new(
        id_prefix: &str,
        valid_states: HashSet<S>,
        init_state: S,
        transitions: HashMap<(S, E), Transition<S, H>>,
    ) -> EngineResult<Self> {
        if valid_states.is_empty() {
            return Err(EngineError::compile("no valid states configured"));
        }
        if !valid_states.contains(&init_state) {
            return Err(EngineError::compile(format!(
                "init state {init_state:?} is not a valid state"
            )));
        }
        if transitions.is_empty() {
            return Err(EngineError::compile("no transitions configured"));
        }
        for ((from, event), transition) in &transitions {
            if !valid_states.contains(from) {
                return Err(EngineError::compile(format!(
                    "transition ({from:?}, {event:?}) starts from an unknown state"
                )));
            }
            if !valid_states.contains(&transition.to) {
                return Err(EngineError::compile(format!(
                    "transition ({from:?}, {event:?}) targets unknown state {:?}",
                    transition.to
                )));
            }
        }

        let mut visit_counts = HashMap::new();
        visit_counts.insert(init_state, 1);

        Ok(Self {
            id: format!("{id_prefix}_{}", Uuid::new_v4().simple()),
            valid_states,
            init_state,
            transitions,
            current_state: init_state,
            visit_counts,
            compiled: true,
        })
    }

    /// Stable per-instance identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state; never undefined after construction.
    pub fn current_state(&self) -> S {
        self.current_state
    }

    /// Initial state.
    pub fn init_state(&self) -> S {
        self.init_state
    }

    /// Copy of the valid-state set.
    pub fn valid_states(&self) -> HashSet<S> {
        self.valid_states.clone()
    }

    /// Copy of the transition table as `(from, event) -> to`.
    pub fn transition_targets(&self) -> HashMap<(S, E), S> {
        self.transitions
            .iter()
            .map(|(key, transition)| (*key, transition.to))
            .collect()
    }

    /// Whether the machine compiled; always true for a constructed machine.
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// How many times `state` has been entered (the initial state counts
    /// its construction-time entry).
    pub fn visit_count(&self, state: S) -> u32 {
        self.visit_counts.get(&state).copied().unwrap_or(0)
    }

    /// Copy of all visit counters.
    pub fn visit_counts(&self) -> HashMap<S, u32> {
        self.visit_counts.clone()
    }

    /// Apply an event: commit the transition, bump the target's visit
    /// counter, and return `(previous, next, hook)` for the caller to await
    /// the hook. On an unknown pair, state and counters are left untouched.
    pub fn apply(&mut self, event: E) -> EngineResult<(S, S, Option<H>)> {
        let key = (self.current_state, event);
        let transition = self
            .transitions
            .get(&key)
            .ok_or_else(|| EngineError::unknown_transition(self.current_state, event))?;
        let previous = self.current_state;
        let next = transition.to;
        let hook = transition.hook.clone();
        self.current_state = next;
        *self.visit_counts.entry(next).or_insert(0) += 1;
        debug!(machine = %self.id, ?previous, ?next, ?event, "transition");
        Ok((previous, next, hook))
    }

    /// Return to the initial state and forget every visit except the
    /// implicit entry into the initial state.
    pub fn reset(&mut self) {
        self.current_state = self.init_state;
        self.visit_counts.clear();
        self.visit_counts.insert(self.init_state, 1);
        debug!(machine = %self.id, state = ?self.init_state, "reset");
    }
}
