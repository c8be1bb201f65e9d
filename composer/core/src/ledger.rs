//! Message Ledger
//!
//! The ordered list of messages the user sees. Optimistic entries are
//! appended the moment the user hits send and removed by id once the
//! submission either reaches the exchange or is rolled back. The streaming
//! exchange appends confirmed user messages and grows assistant messages in
//! place.

use crate::messages::{ChatMessage, MessageId, MessageRole};

/// Ordered message list with speculative insertion and removal by id
#[derive(Clone, Debug, Default)]
pub struct MessageLedger {
    messages: Vec<ChatMessage>,
}

impl MessageLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an optimistic message at the tail
    ///
    /// Returns `false` (and leaves the ledger untouched) if a message with the
    /// same id is already present.
    pub fn insert_optimistic(&mut self, message: ChatMessage) -> bool {
        if self.contains(&message.id) {
            tracing::warn!(id = %message.id, "Duplicate optimistic id rejected");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Remove the entry with this id; a no-op if absent
    pub fn remove_by_id(&mut self, id: &MessageId) -> Option<ChatMessage> {
        let index = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(index))
    }

    /// Replace the whole list (conversation switch or a new empty conversation)
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    /// Append a confirmed message
    pub fn push_persisted(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append text to a message in place
    pub fn append_content(&mut self, id: &MessageId, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Overwrite the content of a message
    pub fn set_content(&mut self, id: &MessageId, content: String) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.content = content;
                true
            }
            None => false,
        }
    }

    /// Drop a trailing assistant message, if the list ends with one
    pub fn pop_trailing_assistant(&mut self) -> Option<ChatMessage> {
        if self.messages.last().map(|m| m.role) == Some(MessageRole::Assistant) {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Whether a message with this id exists
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    /// Get message by ID
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Get all messages
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Owned copy for rendering
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    /// Confirmed messages only, in order (request context)
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| !m.is_optimistic())
            .cloned()
            .collect()
    }

    /// Number of optimistic entries currently present
    #[must_use]
    pub fn optimistic_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_optimistic()).count()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
