//! Message types and multimodal content handling.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Media source - unified way to represent media data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MediaSource {
    /// URL (http, https, data URLs, etc.)
    Url { url: String },
    /// Base64-encoded data
    Base64 { data: String },
}

impl MediaSource {
    /// Create from URL string.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    /// Create from base64 string.
    pub fn base64(data: impl Into<String>) -> Self {
        Self::Base64 { data: data.into() }
    }

    /// Get as URL if available.
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url { url } => Some(url),
            Self::Base64 { .. } => None,
        }
    }
}

/// Content block - provider-agnostic multimodal content.
///
/// A message body is an ordered sequence of these blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Image content - URL or base64 data
    Image {
        #[serde(flatten)]
        source: MediaSource,
        /// Media type (e.g., "image/png")
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },

    /// Video content - URL or base64 data
    Video {
        #[serde(flatten)]
        source: MediaSource,
        /// Media type (e.g., "video/mp4")
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image block from a URL.
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image {
            source: MediaSource::url(url),
            media_type: None,
        }
    }

    /// Create a video block from a URL.
    pub fn video_url(url: impl Into<String>) -> Self {
        Self::Video {
            source: MediaSource::url(url),
            media_type: None,
        }
    }

    /// Check if this is a text block.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Get the text content if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Tool call ID (used to match with the tool result)
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments as a JSON value
    pub args: serde_json::Value,
}

impl ToolCallRequest {
    /// Create a new tool call request.
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Reason why the model stopped generating tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Model completed naturally or hit a stop sequence.
    Stop,
    /// Model reached the maximum number of tokens.
    Length,
    /// Content was filtered due to safety policies.
    ContentFilter,
    /// Model requested one or more tool calls.
    ToolCall,
    /// No stop reason transmitted - the default for chunk messages.
    None,
}

impl Default for StopReason {
    fn default() -> Self {
        Self::None
    }
}

/// Token usage statistics. Negative values mean "unknown".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionUsage {
    /// Input tokens used
    pub prompt_tokens: i64,
    /// Output tokens generated
    pub completion_tokens: i64,
    /// Total tokens used
    pub total_tokens: i64,
}

impl CompletionUsage {
    /// Create usage statistics from known token counts.
    pub const fn new(prompt_tokens: i64, completion_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Merge another usage record into this one, keeping unknowns unknown.
    pub fn merge(&mut self, other: &CompletionUsage) {
        if other.prompt_tokens >= 0 {
            self.prompt_tokens = self.prompt_tokens.max(0) + other.prompt_tokens;
        }
        if other.completion_tokens >= 0 {
            self.completion_tokens = self.completion_tokens.max(0) + other.completion_tokens;
        }
        if other.total_tokens >= 0 {
            self.total_tokens = self.total_tokens.max(0) + other.total_tokens;
        }
    }
}

impl Default for CompletionUsage {
    fn default() -> Self {
        Self {
            prompt_tokens: -1,
            completion_tokens: -1,
            total_tokens: -1,
        }
    }
}

/// A role-tagged multimodal message.
///
/// # Examples
///
/// ```rust
/// use tasktree::types::{ContentBlock, Message, Role};
///
/// let msg = Message::user("Summarize the task").build();
/// assert_eq!(msg.role, Role::User);
///
/// let reply = Message::assistant("Done")
///     .with_block(ContentBlock::image_url("https://example.com/plot.png"))
///     .build();
/// assert_eq!(reply.content.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role
    pub role: Role,
    /// Ordered content blocks (text, image, video)
    pub content: Vec<ContentBlock>,
    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Tool call this message answers (TOOL role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Whether the message carries an error result
    #[serde(default)]
    pub is_error: bool,
    /// Whether the message is a streamed partial chunk
    #[serde(default)]
    pub is_chunking: bool,
    /// Why generation stopped
    #[serde(default)]
    pub stop_reason: StopReason,
    /// Token usage, when reported by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
    /// Structured metadata attached by tools or middleware
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl Message {
    /// Creates a system message builder.
    pub fn system(text: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(Role::System).with_text(text)
    }

    /// Creates a user message builder.
    pub fn user(text: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(Role::User).with_text(text)
    }

    /// Creates an assistant message builder.
    pub fn assistant(text: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(Role::Assistant).with_text(text)
    }

    /// Creates a builder for a message made of pre-built content blocks.
    pub fn with_content(role: Role, content: Vec<ContentBlock>) -> MessageBuilder {
        MessageBuilder::new(role).with_blocks(content)
    }

    /// Creates a tool result message answering `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: Vec<ContentBlock>,
        is_error: bool,
    ) -> MessageBuilder {
        let mut builder = MessageBuilder::new(Role::Tool).with_blocks(content);
        builder.message.tool_call_id = Some(tool_call_id.into());
        builder.message.is_error = is_error;
        builder
    }

    /// Creates a streamed chunk carrying a text fragment.
    pub fn chunk(text: impl Into<String>) -> MessageBuilder {
        let mut builder = MessageBuilder::new(Role::Assistant).with_text(text);
        builder.message.is_chunking = true;
        builder
    }

    /// Concatenated text of every text block.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Whether the message requests any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Whether the message has no content at all.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }
}

/// Message builder.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Start a builder for the given role.
    pub fn new(role: Role) -> Self {
        Self {
            message: Message {
                role,
                content: Vec::new(),
                tool_calls: Vec::new(),
                tool_call_id: None,
                is_error: false,
                is_chunking: false,
                stop_reason: StopReason::None,
                usage: None,
                metadata: serde_json::Map::new(),
                created: Utc::now(),
            },
        }
    }

    /// Append a text block.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.message.content.push(ContentBlock::text(text));
        self
    }

    /// Append a single content block.
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.message.content.push(block);
        self
    }

    /// Append several content blocks.
    pub fn with_blocks(mut self, blocks: Vec<ContentBlock>) -> Self {
        self.message.content.extend(blocks);
        self
    }

    /// Attach tool calls.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.message.tool_calls = tool_calls;
        self
    }

    /// Set the stop reason.
    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.message.stop_reason = stop_reason;
        self
    }

    /// Attach usage statistics.
    pub fn with_usage(mut self, usage: CompletionUsage) -> Self {
        self.message.usage = Some(usage);
        self
    }

    /// Mark the message as an error.
    pub fn with_error(mut self, is_error: bool) -> Self {
        self.message.is_error = is_error;
        self
    }

    /// Attach structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.message.metadata = metadata;
        self
    }

    /// Build the message.
    pub fn build(self) -> Message {
        self.message
    }
}

/// Flatten the text of a block sequence into a single string.
pub fn blocks_text(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        if let ContentBlock::Text { text } = block {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

/// Convenience for building a tag set from string literals.
pub fn tag_set<I, S>(tags: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_roles() {
        assert_eq!(Message::system("s").build().role, Role::System);
        assert_eq!(Message::user("u").build().role, Role::User);
        assert_eq!(Message::assistant("a").build().role, Role::Assistant);
    }

    #[test]
    fn test_text_extraction() {
        let msg = Message::assistant("first")
            .with_block(ContentBlock::image_url("https://example.com/x.png"))
            .with_text("second")
            .build();
        assert_eq!(msg.text(), "first\nsecond");
    }

    #[test]
    fn test_tool_result_shape() {
        let msg = Message::tool_result("call_1", vec![ContentBlock::text("ok")], false).build();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(!msg.is_error);
    }

    #[test]
    fn test_chunk_defaults() {
        let msg = Message::chunk("partial").build();
        assert!(msg.is_chunking);
        assert_eq!(msg.stop_reason, StopReason::None);
    }

    #[test]
    fn test_usage_merge() {
        let mut usage = CompletionUsage::new(10, 5);
        usage.merge(&CompletionUsage::new(3, 2));
        assert_eq!(usage.prompt_tokens, 13);
        assert_eq!(usage.total_tokens, 20);
    }

    #[test]
    fn test_serde_round_trip() {
        let msg = Message::assistant("hello")
            .with_tool_calls(vec![ToolCallRequest::new(
                "call_1",
                "search",
                serde_json::json!({"query": "rust"}),
            )])
            .with_stop_reason(StopReason::ToolCall)
            .build();
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.stop_reason, StopReason::ToolCall);
    }
}
