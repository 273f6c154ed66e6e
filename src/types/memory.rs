//! Memory records persisted through the storage ports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::message::ContentBlock;

/// Base record every memory kind shares: a unique id, the task it belongs
/// to, multimodal content, and its last-updated timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    /// Unique identifier.
    pub id: String,
    /// Identifier of the task the memory was produced for.
    pub task_id: String,
    /// Multimodal content of the memory.
    pub content: Vec<ContentBlock>,
    /// Creation or last-update time.
    pub timestamp: DateTime<Utc>,
}

impl MemoryRecord {
    /// Create a record with a fresh UUID and the current time.
    pub fn new(task_id: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            content,
            timestamp: Utc::now(),
        }
    }
}

/// One round of agent interaction worth recalling later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeMemory {
    #[serde(flatten)]
    pub record: MemoryRecord,
    /// Short summary used as the retrieval key.
    pub summary: String,
}

impl EpisodeMemory {
    pub fn new(
        task_id: impl Into<String>,
        summary: impl Into<String>,
        content: Vec<ContentBlock>,
    ) -> Self {
        Self {
            record: MemoryRecord::new(task_id, content),
            summary: summary.into(),
        }
    }
}

/// Extracted user or environment state, addressed by an exact key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateMemory {
    #[serde(flatten)]
    pub record: MemoryRecord,
}

impl StateMemory {
    pub fn new(task_id: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        Self {
            record: MemoryRecord::new(task_id, content),
        }
    }
}

/// Long-lived factual knowledge, retrieved by similarity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticMemory {
    #[serde(flatten)]
    pub record: MemoryRecord,
    /// Subject the fact is about.
    pub subject: String,
}

impl SemanticMemory {
    pub fn new(
        task_id: impl Into<String>,
        subject: impl Into<String>,
        content: Vec<ContentBlock>,
    ) -> Self {
        Self {
            record: MemoryRecord::new(task_id, content),
            subject: subject.into(),
        }
    }
}
