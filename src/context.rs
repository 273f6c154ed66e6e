//! Conversation context with role-ordering enforcement, and the key/value
//! run context threaded through every scheduled operation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::message::{Message, Role};

/// An ordered sequence of messages with a role-ordering invariant.
///
/// The rules, checked on every append:
/// - `System` may only start the context or follow another `System`;
/// - `User` may follow anything;
/// - `Assistant` may only start the context or follow a `User`;
/// - `Tool` may only start the context or follow an `Assistant` or `Tool`.
///
/// # Example
///
/// ```rust
/// use tasktree::context::Context;
/// use tasktree::types::Message;
///
/// let mut ctx = Context::new();
/// ctx.append(Message::user("hi").build()).unwrap();
/// ctx.append(Message::assistant("hello").build()).unwrap();
/// assert!(ctx.append(Message::system("late").build()).is_err());
/// assert_eq!(ctx.len(), 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    messages: Vec<Message>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, enforcing the role-ordering invariant. On
    /// violation the context is left unchanged.
    pub fn append(&mut self, message: Message) -> EngineResult<()> {
        let last_role = self.messages.last().map(|m| m.role);
        match message.role {
            Role::System => {
                if let Some(last) = last_role {
                    if last != Role::System {
                        return Err(EngineError::ContextOrderViolation(
                            "a system message may only follow another system message".to_string(),
                        ));
                    }
                }
            }
            Role::User => {}
            Role::Assistant => {
                if let Some(last) = last_role {
                    if last != Role::User {
                        return Err(EngineError::ContextOrderViolation(
                            "an assistant message may only follow a user message".to_string(),
                        ));
                    }
                }
            }
            Role::Tool => {
                if let Some(last) = last_role {
                    if last != Role::Assistant && last != Role::Tool {
                        return Err(EngineError::ContextOrderViolation(
                            "a tool message may only follow an assistant or tool message"
                                .to_string(),
                        ));
                    }
                }
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// The messages in program order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Clone the message history, e.g. to hand to a language model.
    pub fn to_messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Remove every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the context holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Role of the last message, if any.
    pub fn last_role(&self) -> Option<Role> {
        self.messages.last().map(|m| m.role)
    }
}

impl<'a> IntoIterator for &'a Context {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Shared key/value bag carrying per-run information (user id, trace id,
/// access tokens) through schedulers, agents, hooks, and tools.
///
/// Cloning is cheap; clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    values: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl RunContext {
    /// Create an empty run context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a value by key.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    /// Fetch a string value by key.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    /// Insert or replace a value.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value);
        }
    }

    /// Snapshot the whole map as a JSON object, e.g. for injection into
    /// tool-service arguments.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.values
            .read()
            .map(|values| values.clone().into_iter().collect())
            .unwrap_or_default()
    }
}

impl<K: Into<String>> FromIterator<(K, serde_json::Value)> for RunContext {
    fn from_iter<T: IntoIterator<Item = (K, serde_json::Value)>>(iter: T) -> Self {
        let ctx = Self::new();
        for (key, value) in iter {
            ctx.set(key, value);
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Message {
        Message::user("u").build()
    }

    fn assistant() -> Message {
        Message::assistant("a").build()
    }

    fn system() -> Message {
        Message::system("s").build()
    }

    fn tool() -> Message {
        Message::tool_result("call_1", vec![], false).build()
    }

    #[test]
    fn test_system_prefix_then_alternation() {
        let mut ctx = Context::new();
        ctx.append(system()).unwrap();
        ctx.append(system()).unwrap();
        ctx.append(user()).unwrap();
        ctx.append(assistant()).unwrap();
        ctx.append(user()).unwrap();
        assert_eq!(ctx.len(), 5);
    }

    #[test]
    fn test_system_rejected_after_user_assistant() {
        let mut ctx = Context::new();
        ctx.append(user()).unwrap();
        ctx.append(assistant()).unwrap();
        let err = ctx.append(system()).unwrap_err();
        assert!(matches!(err, EngineError::ContextOrderViolation(_)));
        // the failed append must not mutate the context
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_assistant_requires_user() {
        let mut ctx = Context::new();
        ctx.append(system()).unwrap();
        assert!(ctx.append(assistant()).is_err());
        // an assistant message may open an empty context
        let mut fresh = Context::new();
        assert!(fresh.append(assistant()).is_ok());
        assert!(fresh.append(assistant()).is_err());
    }

    #[test]
    fn test_tool_follows_assistant_or_tool() {
        let mut ctx = Context::new();
        ctx.append(user()).unwrap();
        assert!(ctx.append(tool()).is_err());
        ctx.append(assistant()).unwrap();
        ctx.append(tool()).unwrap();
        ctx.append(tool()).unwrap();
        assert_eq!(ctx.len(), 4);
    }

    #[test]
    fn test_clear() {
        let mut ctx = Context::new();
        ctx.append(user()).unwrap();
        ctx.clear();
        assert!(ctx.is_empty());
        // a system message is valid again after clearing
        assert!(ctx.append(system()).is_ok());
    }

    #[test]
    fn test_run_context_shared_across_clones() {
        let ctx = RunContext::new();
        let clone = ctx.clone();
        ctx.set("user_id", serde_json::json!("u-1"));
        assert_eq!(clone.get_str("user_id").as_deref(), Some("u-1"));
    }
}
