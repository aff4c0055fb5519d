//! Message and conversation history types.
//!
//! A session's history is an ordered, append-only list of `{role, content}`
//! pairs. Only the orchestrator trims it; nothing else removes entries.
//! Messages carry no ids or timestamps so that identical histories serialize
//! identically (the router's cache key depends on it).

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Runtime notes: tool results, corrective instructions
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// The ordered history of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Keep only the newest `max` messages. Returns how many were dropped.
    pub fn trim_to(&mut self, max: usize) -> usize {
        if self.messages.len() <= max {
            return 0;
        }
        let excess = self.messages.len() - max;
        self.messages.drain(..excess);
        excess
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }
}

impl From<Vec<Message>> for ConversationHistory {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
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
    }

    #[test]
    fn trim_drops_oldest() {
        let mut history = ConversationHistory::new();
        for i in 0..5 {
            history.push(Message::user(format!("m{i}")));
        }
        assert_eq!(history.trim_to(3), 2);
        assert_eq!(history.len(), 3);
        assert_eq!(history.messages()[0].content, "m2");
        assert_eq!(history.trim_to(10), 0);
    }

    #[test]
    fn identical_histories_serialize_identically() {
        let a: ConversationHistory = vec![Message::user("hi"), Message::assistant("hello")].into();
        let b: ConversationHistory = vec![Message::user("hi"), Message::assistant("hello")].into();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert!(serde_json::to_string(&a).unwrap().starts_with('['));
    }

    #[test]
    fn history_token_estimate() {
        let mut history = ConversationHistory::new();
        // 20 chars ≈ 5 tokens
        history.push(Message::user("12345678901234567890"));
        assert_eq!(history.estimated_tokens(), 5);
    }
}
