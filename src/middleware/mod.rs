//! Ready-made hooks: streaming relay, human review, step budgets, and
//! memory recall/persistence.

pub mod human;
pub mod memory;
pub mod step_counter;
pub mod stream;

pub use human::{HumanResponse, HumanReviewGate};
pub use memory::{EpisodeMemoryHooks, StateExtractor, StateMemoryHooks};
pub use step_counter::{MaxStepCounter, TokenStepCounter};
pub use stream::StreamRelayHook;
