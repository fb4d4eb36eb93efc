//! Conversation message domain types.
//!
//! A conversation is a plain ordered `Vec<Message>`; timestamps are unix
//! seconds and are expected to be non-decreasing in input order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (project context, rules)
    System,
    /// Tool output; scored as a neutral role
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Typed metadata carried by a message.
///
/// Only the fields the engine actually reads live here; anything else a
/// caller wants to attach belongs in its own wrapper type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Marks an extractive summary produced by the summarizer.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_summary: bool,

    /// How many messages the summary replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarized_messages: Option<usize>,
}

impl MessageMeta {
    fn is_empty(&self) -> bool {
        !self.is_summary && self.summarized_messages.is_none()
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    #[serde(default = "new_message_id")]
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Unix timestamp in seconds (0 = unset)
    #[serde(default)]
    pub timestamp: i64,

    /// Typed metadata
    #[serde(default, skip_serializing_if = "MessageMeta::is_empty")]
    pub meta: MessageMeta,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    /// Create a message with the given role, stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp(),
            meta: MessageMeta::default(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a tool output message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Override the timestamp (unix seconds).
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the generated ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Mark this message as a conversation summary.
    pub fn as_summary(mut self, summarized_messages: usize) -> Self {
        self.meta.is_summary = true;
        self.meta.summarized_messages = Some(summarized_messages);
        self
    }

    /// Whether the summarizer produced this message.
    pub fn is_summary(&self) -> bool {
        self.meta.is_summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(!msg.is_summary());
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn summary_flag_survives_serialization() {
        let msg = Message::assistant("recap").at(42).as_summary(7);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("is_summary"));

        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(back.is_summary());
        assert_eq!(back.meta.summarized_messages, Some(7));
        assert_eq!(back.timestamp, 42);
    }

    #[test]
    fn plain_message_omits_meta() {
        let msg = Message::user("hi").with_id("m1").at(1);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("meta"));
    }

    #[test]
    fn missing_id_and_timestamp_get_defaults() {
        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"hey"}"#).unwrap();
        assert!(!msg.id.is_empty());
        assert_eq!(msg.timestamp, 0);
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Tool.as_str(), "tool");
    }
}
