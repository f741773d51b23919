use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only in-memory chat log keyed by conversation id
///
/// Appends are synchronous so session callbacks can record transcripts in
/// the order they arrive.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    conversations: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, conversation_id: &str, role: Role, content: impl Into<String>) {
        let message = ChatMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        };
        self.conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }

    /// All messages of a conversation in append order (empty if unknown)
    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn last_message(&self, conversation_id: &str) -> Option<ChatMessage> {
        self.conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(conversation_id)
            .and_then(|messages| messages.last().cloned())
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
