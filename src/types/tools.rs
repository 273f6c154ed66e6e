//! Tool descriptors and tool outputs.
//!
//! The same descriptor shape is used for workflow-local tools and for tools
//! served by an external tool service; only the dispatch path differs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::message::ContentBlock;

/// Describes a callable tool: name, human-readable description, JSON schema
/// for its arguments, and the tags a task must carry to use it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name, unique within its registry.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema of the argument object.
    #[serde(default = "default_schema")]
    pub input_schema: serde_json::Value,
    /// Tags carried by the tool; a service-side tool is visible to a task
    /// when the tool's tags are a subset of the task's tags.
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub tags: HashSet<String>,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    /// Create a descriptor with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: default_schema(),
            tags: HashSet::new(),
        }
    }

    /// Set the argument schema.
    pub fn with_schema(mut self, input_schema: serde_json::Value) -> Self {
        self.input_schema = input_schema;
        self
    }

    /// Set the tag set.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolOutput {
    /// Content blocks produced by the tool.
    pub content: Vec<ContentBlock>,
    /// Optional structured payload mirroring the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    /// Whether the invocation failed.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            structured_content: None,
            is_error: false,
        }
    }

    /// Successful structured output with a text rendering.
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            content: vec![ContentBlock::text(value.to_string())],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// Failed invocation with an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            structured_content: None,
            is_error: true,
        }
    }
}
