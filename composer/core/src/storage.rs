//! Conversation Storage
//!
//! The durable record lives behind [`ConversationStore`]. The Composer only
//! creates conversations, caches the messages it produced and reads a
//! conversation's stored settings back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::identity::Identity;
use crate::messages::{ChatMessage, ConversationId};

/// Stored conversation settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id
    pub id: ConversationId,
    /// Identity that owns the conversation
    pub owner: String,
    /// Selected model
    pub model: String,
    /// Selected agent, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// System prompt override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Parameters for a new conversation
#[derive(Clone, Debug)]
pub struct NewConversation<'a> {
    /// Owner
    pub identity: &'a Identity,
    /// Model selected when the first message was sent
    pub model: &'a str,
    /// Agent selected when the first message was sent
    pub agent_id: Option<&'a AgentId>,
    /// Resolved system prompt
    pub system_prompt: Option<&'a str>,
}

/// Storage collaborator
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation record
    async fn create_conversation(&self, params: NewConversation<'_>) -> anyhow::Result<Conversation>;

    /// Cache a message against a conversation
    async fn cache_message(
        &self,
        conversation_id: &ConversationId,
        message: &ChatMessage,
    ) -> anyhow::Result<()>;

    /// Look up a conversation
    async fn get_conversation_by_id(
        &self,
        conversation_id: &ConversationId,
    ) -> anyhow::Result<Option<Conversation>>;

    /// Persist a model change
    async fn update_model(&self, conversation_id: &ConversationId, model: &str) -> anyhow::Result<()>;
}
