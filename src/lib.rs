//! # tasktree
//!
//! A hierarchical agent-task execution engine. Tree-structured tasks are
//! driven through declarative state machines: an outer *task* machine
//! (created → running → finished/canceled) owned by a [`scheduler`], whose
//! running phase is realized by an inner *workflow* machine executed by an
//! [`agent`]. The scheduler owns correctness - termination, retry bounds,
//! sub-task ordering, cancellation propagation - while agents own the
//! observe/think/act loop over a language-model port.
//!
//! External collaborators (models, tool services, memory stores, human
//! reviewers) are typed [`ports`]; the engine never talks to a network
//! itself.
//!
//! ## Quick tour
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasktree::prelude::*;
//!
//! # async fn demo(executor: Arc<tasktree::agent::Agent<tasktree::agent::ReflectStage, tasktree::agent::ReflectEvent, TaskState, TaskEvent>>) -> tasktree::error::EngineResult<()> {
//! // one root task, the default state graph, depth bound 5
//! let root = tasktree::task::default_tree_task(5)?.into_handle();
//! root.lock().await.set_input(vec![ContentBlock::text("summarize the report")]);
//!
//! // the default tree scheduler with up to 3 retries per task
//! let scheduler = tasktree::scheduler::build_base_scheduler::<_, _, OrchestrateStage, OrchestrateEvent>(executor, None, 3)?;
//!
//! let queue = MessageQueue::new();
//! scheduler.schedule(RunContext::new(), queue, root.clone()).await?;
//! println!("{:?}", root.lock().await.output());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod context;
pub mod error;
pub mod machine;
pub mod middleware;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod scheduler;
pub mod settings;
pub mod task;
pub mod types;
pub mod utils;
pub mod workflow;

/// The most commonly used names in one import.
pub mod prelude {
    pub use crate::agent::{
        Agent, HookOutcome, OrchestrateEvent, OrchestrateStage, ReflectEvent, ReflectStage,
        StepOutcome,
    };
    pub use crate::context::{Context, RunContext};
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::machine::{Event, State, StateMachine, Transition};
    pub use crate::ports::{
        EmbeddingModel, HumanClient, KvStore, LanguageModel, SqlStore, ToolService, VectorStore,
    };
    pub use crate::queue::{AsyncQueue, MessageQueue};
    pub use crate::scheduler::Scheduler;
    pub use crate::settings::Settings;
    pub use crate::task::{Task, TaskDescriptor, TaskEvent, TaskState, TreeTask, TreeTaskHandle};
    pub use crate::types::{
        CompletionConfig, CompletionUsage, ContentBlock, Message, Role, StopReason,
        ToolCallRequest, ToolDescriptor, ToolOutput,
    };
    pub use crate::workflow::{Workflow, WorkflowHandle, WorkflowTool};
}
