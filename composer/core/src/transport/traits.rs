//! Chat Transport Traits
//!
//! The wire protocol and model invocation belong to the backend. The Composer
//! only needs to hand over a request and read back a token stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::AgentId;
use crate::messages::{Attachment, ChatMessage, ConversationId};

/// Token stream events from the chat backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A chunk of assistant text
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// The backend failed; the body is shown to the user after parsing
    Error(String),
}

/// Request body for one exchange
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Conversation the exchange belongs to
    pub chat_id: ConversationId,
    /// Resolved identity
    pub user_id: String,
    /// Selected model
    pub model: String,
    /// Whether the identity is a signed-in user
    pub is_authenticated: bool,
    /// Resolved system prompt
    pub system_prompt: String,
    /// Current agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Durable attachment references for the new user message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Conversation context, filled in by the exchange
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Create a request without context messages
    pub fn new(
        chat_id: ConversationId,
        user_id: impl Into<String>,
        model: impl Into<String>,
        is_authenticated: bool,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            chat_id,
            user_id: user_id.into(),
            model: model.into(),
            is_authenticated,
            system_prompt: system_prompt.into(),
            agent_id: None,
            attachments: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Set the agent
    #[must_use]
    pub fn with_agent(mut self, agent_id: Option<AgentId>) -> Self {
        self.agent_id = agent_id;
        self
    }

    /// Set the attachments
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// The last user message in the context, if any
    #[must_use]
    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::messages::MessageRole::User)
    }
}

/// Streaming transport collaborator
///
/// Implement this trait to talk to a different chat backend.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that will receive tokens as they arrive.
    /// The channel closes after `Complete` or `Error`.
    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;
}
