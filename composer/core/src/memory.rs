//! In-Memory Collaborators
//!
//! Process-local implementations of every collaborator trait. They back the
//! headless driver and the test-suite, and expose a few knobs (failure
//! injection, call counters, a lookup gate) for exercising rollback
//! paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::agent::{Agent, AgentDirectory, AgentId, AgentScope};
use crate::attachments::{AttachmentUploader, LocalFile, PersistedAttachment};
use crate::config::ModelCatalog;
use crate::guards::{UsageProvider, UsageSnapshot};
use crate::identity::{Identity, IdentityProvider};
use crate::messages::{ChatMessage, ConversationId};
use crate::storage::{Conversation, ConversationStore, NewConversation};
use crate::transport::{ChatRequest, ChatTransport, StreamingToken};

// =============================================================================
// Identity
// =============================================================================

/// Mints one guest id per provider
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    guest_id: Mutex<Option<String>>,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl MemoryIdentityProvider {
    /// Create a provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of calls so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn get_or_create_guest(&self) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("guest identity service unavailable");
        }
        let mut guest = self.guest_id.lock();
        Ok(guest
            .get_or_insert_with(|| format!("guest-{}", Uuid::new_v4()))
            .clone())
    }
}

// =============================================================================
// Conversations
// =============================================================================

/// Conversations and cached messages held in memory
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    conversations: DashMap<ConversationId, Conversation>,
    messages: DashMap<ConversationId, Vec<ChatMessage>>,
    fail_creates: AtomicBool,
}

impl MemoryConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_conversation` fail
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Insert a conversation directly
    pub fn insert(&self, conversation: Conversation) {
        self.conversations.insert(conversation.id.clone(), conversation);
    }

    /// Number of conversations
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Messages cached for a conversation, in order
    #[must_use]
    pub fn cached_messages(&self, conversation_id: &ConversationId) -> Vec<ChatMessage> {
        self.messages
            .get(conversation_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_conversation(&self, params: NewConversation<'_>) -> anyhow::Result<Conversation> {
        if self.fail_creates.load(Ordering::SeqCst) {
            anyhow::bail!("conversation storage unavailable");
        }
        let conversation = Conversation {
            id: ConversationId::new(format!("chat-{}", Uuid::new_v4())),
            owner: params.identity.id().to_string(),
            model: params.model.to_string(),
            agent_id: params.agent_id.cloned(),
            system_prompt: params.system_prompt.map(str::to_string),
        };
        self.insert(conversation.clone());
        Ok(conversation)
    }

    async fn cache_message(
        &self,
        conversation_id: &ConversationId,
        message: &ChatMessage,
    ) -> anyhow::Result<()> {
        self.messages
            .entry(conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn get_conversation_by_id(
        &self,
        conversation_id: &ConversationId,
    ) -> anyhow::Result<Option<Conversation>> {
        Ok(self
            .conversations
            .get(conversation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn update_model(&self, conversation_id: &ConversationId, model: &str) -> anyhow::Result<()> {
        let mut conversation = self
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow::anyhow!("unknown conversation {conversation_id}"))?;
        conversation.model = model.to_string();
        Ok(())
    }
}

// =============================================================================
// Usage
// =============================================================================

/// Per-identity message counters for the current UTC day
#[derive(Debug, Default)]
pub struct DailyUsageTracker {
    counters: DashMap<(String, NaiveDate), UsageSnapshot>,
    unavailable: AtomicBool,
    gate: Option<Arc<Notify>>,
}

impl DailyUsageTracker {
    /// Create a tracker with no usage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every lookup until the gate is notified, so a submission stays
    /// suspended in the guards
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Make lookups fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Count one message sent today
    pub fn record(&self, identity_id: &str, pro: bool) {
        let today = Utc::now().date_naive();
        let mut usage = self
            .counters
            .entry((identity_id.to_string(), today))
            .or_default();
        usage.daily_count += 1;
        if pro {
            usage.daily_pro_count += 1;
        }
    }

    fn today(&self, identity_id: &str) -> UsageSnapshot {
        let today = Utc::now().date_naive();
        self.counters
            .get(&(identity_id.to_string(), today))
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UsageProvider for DailyUsageTracker {
    async fn usage(&self, identity: &Identity) -> anyhow::Result<UsageSnapshot> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("usage service unavailable");
        }
        Ok(self.today(identity.id()))
    }
}

// =============================================================================
// Attachments
// =============================================================================

/// Pretends to upload files, returning `memory://` URIs
#[derive(Debug, Default)]
pub struct MemoryAttachmentUploader {
    failing_files: Mutex<HashSet<String>>,
    uploads: AtomicUsize,
}

impl MemoryAttachmentUploader {
    /// Create an uploader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop this file from every batch, producing a partial upload
    pub fn fail_file(&self, name: &str) {
        self.failing_files.lock().insert(name.to_string());
    }

    /// Number of files uploaded
    #[must_use]
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttachmentUploader for MemoryAttachmentUploader {
    async fn upload(
        &self,
        _identity: &Identity,
        conversation_id: &ConversationId,
        files: &[LocalFile],
    ) -> anyhow::Result<Vec<PersistedAttachment>> {
        let failing = self.failing_files.lock().clone();
        let persisted: Vec<_> = files
            .iter()
            .filter(|file| !failing.contains(&file.name))
            .map(|file| PersistedAttachment {
                name: file.name.clone(),
                content_type: file.content_type.clone(),
                url: format!("memory://{conversation_id}/{}-{}", Uuid::new_v4(), file.name),
            })
            .collect();
        self.uploads.fetch_add(persisted.len(), Ordering::SeqCst);
        Ok(persisted)
    }
}

// =============================================================================
// Agents
// =============================================================================

/// Agent directory held in memory
#[derive(Debug, Default)]
pub struct MemoryAgentDirectory {
    agents: RwLock<Vec<Agent>>,
    fetches: AtomicUsize,
}

impl MemoryAgentDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent
    pub fn add(&self, agent: Agent) {
        self.agents.write().push(agent);
    }

    /// Number of single-agent fetches served
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentDirectory for MemoryAgentDirectory {
    async fn fetch_by_slug_or_id(
        &self,
        slug: Option<&str>,
        id: Option<&AgentId>,
    ) -> anyhow::Result<Option<Agent>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let agents = self.agents.read();
        let found = match (id, slug) {
            (Some(id), _) => agents.iter().find(|a| &a.id == id),
            (None, Some(slug)) => agents.iter().find(|a| a.slug == slug),
            (None, None) => None,
        };
        Ok(found.cloned())
    }

    async fn curated_agents(&self) -> anyhow::Result<Vec<Agent>> {
        Ok(self
            .agents
            .read()
            .iter()
            .filter(|a| a.scope == AgentScope::Curated)
            .cloned()
            .collect())
    }

    async fn user_agents(&self, identity: &Identity) -> anyhow::Result<Vec<Agent>> {
        Ok(self
            .agents
            .read()
            .iter()
            .filter(|a| a.scope == AgentScope::User && a.creator_id.as_deref() == Some(identity.id()))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Transport
// =============================================================================

/// How the echo transport answers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EchoMode {
    /// Stream the last user message back word by word
    #[default]
    Echo,
    /// Answer with an error body
    Fail(String),
    /// Refuse the request outright
    Refuse,
    /// Keep the stream open without sending anything
    Stall,
}

/// In-process transport for manual runs and tests
#[derive(Default)]
pub struct EchoTransport {
    mode: RwLock<EchoMode>,
    requests: Mutex<Vec<ChatRequest>>,
    usage: Option<(Arc<DailyUsageTracker>, ModelCatalog)>,
}

impl EchoTransport {
    /// Create an echoing transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every request against a usage tracker, like a real backend
    #[must_use]
    pub fn with_usage(mut self, tracker: Arc<DailyUsageTracker>, catalog: ModelCatalog) -> Self {
        self.usage = Some((tracker, catalog));
        self
    }

    /// Change how future requests are answered
    pub fn set_mode(&self, mode: EchoMode) {
        *self.mode.write() = mode;
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatTransport for EchoTransport {
    fn name(&self) -> &'static str {
        "Echo"
    }

    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let mode = self.mode.read().clone();
        if mode == EchoMode::Refuse {
            anyhow::bail!("echo transport refused the request");
        }
        self.requests.lock().push(request.clone());
        if let Some((tracker, catalog)) = &self.usage {
            tracker.record(&request.user_id, catalog.is_pro(&request.model));
        }

        let (tx, rx) = mpsc::channel(100);
        let prompt = request
            .last_user_message()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        tokio::spawn(async move {
            match mode {
                EchoMode::Echo => {
                    let mut full = String::new();
                    for word in prompt.split_inclusive(' ') {
                        full.push_str(word);
                        if tx.send(StreamingToken::Token(word.to_string())).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(StreamingToken::Complete { message: full }).await;
                }
                EchoMode::Fail(body) => {
                    let _ = tx.send(StreamingToken::Error(body)).await;
                }
                EchoMode::Stall => tx.closed().await,
                EchoMode::Refuse => {}
            }
        });

        Ok(rx)
    }
}
