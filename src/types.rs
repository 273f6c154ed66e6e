//! Core data types: messages, completion parameters, tools, and memory
//! records. Everything here is serde round-trippable and provider-agnostic.

pub mod memory;
pub mod message;
pub mod params;
pub mod tools;

pub use memory::{EpisodeMemory, MemoryRecord, SemanticMemory, StateMemory};
pub use message::{
    blocks_text, tag_set, CompletionUsage, ContentBlock, MediaSource, Message, MessageBuilder,
    Role, StopReason, ToolCallRequest,
};
pub use params::{CompletionConfig, CompletionConfigBuilder};
pub use tools::{ToolDescriptor, ToolOutput};
