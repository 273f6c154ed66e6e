//! Error handling for the engine.
//!
//! A single [`EngineError`] enum covers every failure the core can produce,
//! from construction-time compile errors to runtime transition and tool
//! failures. [`ErrorCategory`] gives callers a coarse classification that is
//! stable across variants, which is what retry policies and user-facing
//! renderers should branch on.
//!
//! # Example
//!
//! ```rust
//! use tasktree::error::{EngineError, ErrorCategory};
//!
//! let error = EngineError::compile("end state unreachable");
//! assert_eq!(error.category(), ErrorCategory::Compile);
//! assert!(!error.is_retryable());
//!
//! let error = EngineError::tool_not_found("search");
//! assert_eq!(error.category(), ErrorCategory::Tool);
//! assert!(error.is_retryable());
//! ```

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// The engine error type.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A state machine or scheduler failed its compile checks.
    #[error("compile error: {0}")]
    Compile(String),

    /// `compile()` was invoked on an already compiled scheduler.
    #[error("scheduler is already compiled")]
    AlreadyCompiled,

    /// `handle_event` found no transition for the current state/event pair.
    #[error("no transition from state `{state}` on event `{event}`")]
    UnknownTransition { state: String, event: String },

    /// A task was handed to a scheduler whose state graph does not cover it.
    #[error("task does not match scheduler configuration: {0}")]
    TaskSchedulerMismatch(String),

    /// A non-terminal state has no registered on-state handler.
    #[error("no on-state handler registered for state `{0}`")]
    MissingOnStateHandler(String),

    /// A workflow tool was invoked by a task lacking the required tags.
    #[error("tool `{name}` requires tags {required:?} but task has tags {actual:?}")]
    ToolTagMismatch {
        name: String,
        required: Vec<String>,
        actual: Vec<String>,
    },

    /// The tool is neither registered on the workflow nor reachable through
    /// a tool service.
    #[error("tool `{0}` not found in workflow and no tool service is configured")]
    ToolNotFound(String),

    /// A tree mutation would place a node past its depth bound.
    #[error("tree depth {depth} exceeds the maximum depth {max}")]
    DepthExceeded { depth: usize, max: usize },

    /// A message append would violate the role-ordering invariant.
    #[error("context ordering violated: {0}")]
    ContextOrderViolation(String),

    /// The queue was closed; no further items are accepted.
    #[error("queue is closed")]
    QueueClosed,

    /// A non-blocking put found the queue at capacity.
    #[error("queue is full")]
    QueueFull,

    /// A non-blocking get found the queue empty.
    #[error("queue is empty")]
    QueueEmpty,

    /// A blocking queue operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A step counter exhausted its budget for the current run.
    #[error("maximum step count {limit} exceeded")]
    MaxStepsExceeded { limit: u64 },

    /// The language-model port reported a failure.
    #[error("completion failed: {0}")]
    Completion(String),

    /// A tool handler or the tool service reported a failure.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// A storage port (vector/KV/SQL) reported a failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A builder or settings value was inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An argument failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(String),

    /// Anything that indicates a bug in the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse-grained classification for presentation and retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Construction-time failures; never retryable.
    Compile,
    /// The state graph rejected an event or a task.
    Transition,
    /// Tool resolution or execution failed.
    Tool,
    /// Queue lifecycle failures.
    Queue,
    /// External port (LLM/storage) failures.
    External,
    /// Caller-supplied values were invalid.
    Usage,
    /// Engine bugs.
    Internal,
}

impl EngineError {
    /// Build an [`EngineError::UnknownTransition`] from debug-printable parts.
    pub fn unknown_transition(state: impl std::fmt::Debug, event: impl std::fmt::Debug) -> Self {
        Self::UnknownTransition {
            state: format!("{state:?}"),
            event: format!("{event:?}"),
        }
    }

    /// Build an [`EngineError::ToolNotFound`].
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Build an [`EngineError::Compile`].
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile(message.into())
    }

    /// Build an [`EngineError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Classify the error for presentation and retry decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Compile(_) | Self::AlreadyCompiled => ErrorCategory::Compile,
            Self::UnknownTransition { .. }
            | Self::TaskSchedulerMismatch(_)
            | Self::MissingOnStateHandler(_) => ErrorCategory::Transition,
            Self::ToolTagMismatch { .. } | Self::ToolNotFound(_) | Self::ToolExecution(_) => {
                ErrorCategory::Tool
            }
            Self::QueueClosed | Self::QueueFull | Self::QueueEmpty | Self::Timeout(_) => {
                ErrorCategory::Queue
            }
            Self::Completion(_) | Self::Storage(_) => ErrorCategory::External,
            Self::DepthExceeded { .. }
            | Self::ContextOrderViolation(_)
            | Self::MaxStepsExceeded { .. }
            | Self::Configuration(_)
            | Self::InvalidParameter(_)
            | Self::Json(_) => ErrorCategory::Usage,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the scheduler's retry loop may reasonably re-attempt after
    /// this error. Compile errors and API-contract violations are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Tool | ErrorCategory::External
        ) || matches!(self, Self::Timeout(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
