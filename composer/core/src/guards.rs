//! Submission Guards
//!
//! Preconditions checked, in order, before a message may be sent:
//! 1. usage quota for the identity and model tier
//! 2. a conversation record exists (created on first send)
//! 3. input length
//!
//! The pipeline stops at the first failure. A failure carries the exact text
//! shown to the user; the orchestrator owns the rollback.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::config::ComposerConfig;
use crate::identity::Identity;
use crate::messages::{ConversationId, Notification};
use crate::storage::{ConversationStore, NewConversation};

/// Shown when the usage collaborator cannot be reached
pub const USAGE_UNAVAILABLE_MESSAGE: &str = "Unable to verify usage limits.";
/// Shown when a guest runs out of messages
pub const GUEST_LIMIT_MESSAGE: &str =
    "You've reached the daily limit for guests. Sign in to keep chatting.";
/// Shown when a signed-in user runs out of messages
pub const AUTH_LIMIT_MESSAGE: &str = "You've reached your daily message limit.";
/// Shown when the pro-model quota is exhausted
pub const PRO_LIMIT_MESSAGE: &str = "You've reached the daily limit for pro models.";
/// Shown when a conversation record could not be created
pub const CONVERSATION_FAILED_MESSAGE: &str = "Failed to start a new conversation.";

/// Today's counters for an identity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Messages sent today
    pub daily_count: u32,
    /// Messages sent today to pro models
    pub daily_pro_count: u32,
}

/// Usage-limit collaborator
#[async_trait]
pub trait UsageProvider: Send + Sync {
    /// Today's counters for the identity
    async fn usage(&self, identity: &Identity) -> anyhow::Result<UsageSnapshot>;
}

/// Which guard refused the submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardKind {
    /// Daily quota
    Usage,
    /// Conversation creation
    Conversation,
    /// Input length
    InputLength,
}

/// A refused submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardFailure {
    /// The guard that failed
    pub guard: GuardKind,
    /// User-facing explanation
    pub message: String,
    /// Offer sign-in alongside the message
    pub auth_prompt: bool,
}

impl GuardFailure {
    fn new(guard: GuardKind, message: impl Into<String>) -> Self {
        Self {
            guard,
            message: message.into(),
            auth_prompt: false,
        }
    }
}

/// A submission that passed every guard
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cleared {
    /// Existing or freshly created conversation
    pub conversation_id: ConversationId,
    /// Informational notices raised while passing (low quota)
    pub notices: Vec<Notification>,
}

/// Everything the guards look at for one attempt
#[derive(Clone, Copy, Debug)]
pub struct GuardInput<'a> {
    /// Resolved identity
    pub identity: &'a Identity,
    /// Active conversation, if one exists yet
    pub conversation_id: Option<&'a ConversationId>,
    /// Selected model
    pub model: &'a str,
    /// Current agent
    pub agent_id: Option<&'a AgentId>,
    /// Resolved system prompt
    pub system_prompt: &'a str,
    /// Text being submitted
    pub input: &'a str,
}

/// Daily quota check
pub struct UsageGuard {
    provider: Arc<dyn UsageProvider>,
    config: Arc<ComposerConfig>,
}

impl UsageGuard {
    /// Create the guard
    pub fn new(provider: Arc<dyn UsageProvider>, config: Arc<ComposerConfig>) -> Self {
        Self { provider, config }
    }

    /// Check the identity's quota for the model
    ///
    /// Returns an optional low-quota notice on success.
    pub async fn check(
        &self,
        identity: &Identity,
        model: &str,
    ) -> Result<Option<Notification>, GuardFailure> {
        let usage = self.provider.usage(identity).await.map_err(|e| {
            tracing::warn!(error = %e, identity = %identity, "Usage lookup failed");
            GuardFailure::new(GuardKind::Usage, USAGE_UNAVAILABLE_MESSAGE)
        })?;

        let authenticated = identity.is_authenticated();
        let limit = self.config.daily_limit(authenticated);
        if usage.daily_count >= limit {
            tracing::debug!(identity = %identity, count = usage.daily_count, limit, "Daily limit reached");
            return Err(if authenticated {
                GuardFailure::new(GuardKind::Usage, AUTH_LIMIT_MESSAGE)
            } else {
                GuardFailure {
                    auth_prompt: true,
                    ..GuardFailure::new(GuardKind::Usage, GUEST_LIMIT_MESSAGE)
                }
            });
        }
        let mut remaining = limit - usage.daily_count - 1;

        if self.config.catalog.is_pro(model) {
            let pro_limit = self.config.pro_daily_message_limit;
            if usage.daily_pro_count >= pro_limit {
                tracing::debug!(identity = %identity, model, "Pro model limit reached");
                return Err(GuardFailure::new(GuardKind::Usage, PRO_LIMIT_MESSAGE));
            }
            remaining = remaining.min(pro_limit - usage.daily_pro_count - 1);
        }

        if remaining <= self.config.remaining_query_alert_threshold {
            let noun = if remaining == 1 { "query" } else { "queries" };
            return Ok(Some(Notification::info(format!(
                "Only {remaining} {noun} remaining today."
            ))));
        }
        Ok(None)
    }
}

/// Guarantees a conversation record exists
pub struct ConversationGuard {
    store: Arc<dyn ConversationStore>,
}

impl ConversationGuard {
    /// Create the guard
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Return the active conversation, creating one if there is none
    pub async fn ensure(&self, input: &GuardInput<'_>) -> Result<ConversationId, GuardFailure> {
        if let Some(id) = input.conversation_id {
            return Ok(id.clone());
        }

        let params = NewConversation {
            identity: input.identity,
            model: input.model,
            agent_id: input.agent_id,
            system_prompt: Some(input.system_prompt),
        };
        match self.store.create_conversation(params).await {
            Ok(conversation) => {
                tracing::info!(conversation_id = %conversation.id, model = input.model, "Conversation created");
                Ok(conversation.id)
            }
            Err(e) => {
                tracing::warn!(error = %e, identity = %input.identity, "Conversation creation failed");
                Err(GuardFailure::new(GuardKind::Conversation, CONVERSATION_FAILED_MESSAGE))
            }
        }
    }
}

/// Rejects input over the configured character count
#[derive(Clone, Copy, Debug)]
pub struct InputLengthGuard {
    max_chars: usize,
}

impl InputLengthGuard {
    /// Create the guard
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Check the input, counting characters rather than bytes
    pub fn check(&self, input: &str) -> Result<(), GuardFailure> {
        if input.chars().count() > self.max_chars {
            return Err(GuardFailure::new(
                GuardKind::InputLength,
                format!(
                    "The message you submitted was too long, please submit something shorter. (Max {} characters)",
                    self.max_chars
                ),
            ));
        }
        Ok(())
    }
}

/// The three guards in their fixed order
pub struct GuardPipeline {
    usage: UsageGuard,
    conversation: ConversationGuard,
    length: InputLengthGuard,
}

impl GuardPipeline {
    /// Assemble the pipeline
    pub fn new(
        usage_provider: Arc<dyn UsageProvider>,
        store: Arc<dyn ConversationStore>,
        config: Arc<ComposerConfig>,
    ) -> Self {
        let length = InputLengthGuard::new(config.max_input_length);
        Self {
            usage: UsageGuard::new(usage_provider, config),
            conversation: ConversationGuard::new(store),
            length,
        }
    }

    /// Run every guard, stopping at the first failure
    pub async fn run(&self, input: GuardInput<'_>) -> Result<Cleared, GuardFailure> {
        let notice = self.usage.check(input.identity, input.model).await?;
        let conversation_id = self.conversation.ensure(&input).await?;
        self.length.check(input.input)?;

        Ok(Cleared {
            conversation_id,
            notices: notice.into_iter().collect(),
        })
    }
}
