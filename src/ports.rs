//! External collaborator ports.
//!
//! The engine consumes language models, tool services, human reviewers,
//! and memory stores exclusively through the traits in this module; adapter
//! crates implement them. Nothing in the core ever talks to a network.

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::EngineResult;
use crate::queue::MessageQueue;
use crate::types::message::{ContentBlock, Message};
use crate::types::params::CompletionConfig;
use crate::types::tools::{ToolDescriptor, ToolOutput};

/// A chat language model.
///
/// When `stream_queue` is given, the adapter must push each partial chunk
/// into it as a message with `is_chunking = true` and `stop_reason = None`,
/// and the final aggregated message with `is_chunking = false`, before
/// returning that same aggregated message.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name, e.g. `"openai"`.
    fn provider(&self) -> &str;

    /// Model identifier, e.g. `"gpt-4o-mini"`.
    fn model(&self) -> &str;

    /// Run one completion over `messages` with `tools` available.
    async fn completion(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDescriptor>,
        stream_queue: Option<MessageQueue>,
        config: &CompletionConfig,
    ) -> EngineResult<Message>;
}

/// An embedding model.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Provider name.
    fn provider(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Embed one content sequence into a vector of `dimensions` floats.
    async fn embed(&self, content: Vec<ContentBlock>, dimensions: usize)
        -> EngineResult<Vec<f32>>;

    /// Embed a batch of content sequences.
    async fn embed_batch(
        &self,
        contents: Vec<Vec<ContentBlock>>,
        dimensions: usize,
    ) -> EngineResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(contents.len());
        for content in contents {
            out.push(self.embed(content, dimensions).await?);
        }
        Ok(out)
    }
}

/// An external tool registry and executor (RPC substrate, MCP server, ...).
#[async_trait]
pub trait ToolService: Send + Sync {
    /// List every tool the service exposes, including tag metadata.
    async fn list_tools(&self) -> EngineResult<Vec<ToolDescriptor>>;

    /// Execute a tool by name with structured arguments.
    async fn call_tool(&self, name: &str, arguments: serde_json::Value)
        -> EngineResult<ToolOutput>;
}

/// A channel to a human reviewer.
#[async_trait]
pub trait HumanClient: Send + Sync {
    /// Whether the current run context supports human interaction.
    fn is_valid(&self, context: &RunContext) -> bool;

    /// Send `message` to the human and wait for the reply.
    async fn ask_human(
        &self,
        context: &RunContext,
        queue: &MessageQueue,
        message: Message,
    ) -> EngineResult<Message>;
}

/// A similarity-searchable memory store.
#[async_trait]
pub trait VectorStore<M: Send + Sync>: Send + Sync {
    /// Persist a record.
    async fn add(&self, record: M) -> EngineResult<()>;

    /// Delete a record by id.
    async fn delete(&self, id: &str) -> EngineResult<()>;

    /// Replace a record in place.
    async fn update(&self, record: M) -> EngineResult<()>;

    /// Structured query with a filter expression.
    async fn query(
        &self,
        filter: &str,
        output_fields: &[&str],
        limit: usize,
    ) -> EngineResult<Vec<M>>;

    /// Similarity search; returns records with scores at or above
    /// `threshold`, best first.
    async fn search(
        &self,
        query: Vec<ContentBlock>,
        top_k: usize,
        threshold: f32,
        filter: Option<&str>,
    ) -> EngineResult<Vec<(M, f32)>>;
}

/// An exact-key memory store.
#[async_trait]
pub trait KvStore<M: Send + Sync>: Send + Sync {
    /// Fetch the record stored under `key`, if any.
    async fn search(&self, key: &str) -> EngineResult<Option<M>>;

    /// Store `value` under `key`, replacing any previous record.
    async fn add(&self, key: &str, value: M) -> EngineResult<()>;
}

/// A relational memory store.
#[async_trait]
pub trait SqlStore<M: Send + Sync>: Send + Sync {
    /// Fetch records matching a where clause.
    async fn search(
        &self,
        r#where: &str,
        order_by: Option<&str>,
        limit: usize,
    ) -> EngineResult<Vec<M>>;

    /// Persist a record.
    async fn add(&self, record: M) -> EngineResult<()>;
}
