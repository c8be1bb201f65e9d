//! Composer - The Submission Orchestrator
//!
//! The Composer owns the input field of one chat surface and everything that
//! happens between pressing send and the backend taking over:
//! - identity resolution
//! - the optimistic message bubble
//! - guard checks and attachment upload
//! - hand-off to the streaming exchange
//! - rollback when any of that fails
//!
//! # Design Philosophy
//!
//! The Composer is UI-agnostic. The surface renders [`ComposerEvent`]s and
//! reads snapshots; it never reaches into Composer state. The active
//! conversation is not global state either: every operation receives the
//! caller's [`ChatSession`].
//!
//! One submission runs at a time. The in-flight flag is taken before the
//! first suspension point and released by a drop guard, so it is cleared on
//! every exit path. By the time it is released the optimistic message has
//! left the ledger, either reconciled or rolled back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::agent::{Agent, AgentDirectory, AgentResolver};
use crate::attachments::{
    AttachmentCoordinator, AttachmentStats, AttachmentUploader, LocalFile, PersistedAttachment,
    PlaceholderAttachment,
};
use crate::config::ComposerConfig;
use crate::draft::{DraftKey, DraftStore};
use crate::guards::{GuardInput, GuardPipeline, UsageProvider};
use crate::identity::{Identity, IdentityProvider, IdentityResolver, User};
use crate::ledger::MessageLedger;
use crate::messages::{
    ChatMessage, ComposerEvent, ConversationId, LedgerChange, MessageId, MessageRole,
    Notification, RemovalCause, SubmissionPhase,
};
use crate::storage::{Conversation, ConversationStore};
use crate::streaming::{
    parse_error_message, ExchangeError, ExchangeSnapshot, ExchangeStatus, StreamingExchange,
};
use crate::transport::{ChatRequest, ChatTransport};

/// Shown when the exchange refuses the hand-off
pub const SEND_FAILED_MESSAGE: &str = "Failed to send message";
/// Shown when the attachment batch could not be uploaded
pub const UPLOAD_FAILED_MESSAGE: &str = "Failed to upload files.";
/// Shown when staging files for a model without file support
pub const FILE_UPLOAD_UNSUPPORTED_MESSAGE: &str = "This model does not support file uploads.";
/// Shown when a model change could not be saved
pub const MODEL_UPDATE_FAILED_MESSAGE: &str = "Failed to update the conversation model.";

/// Query parameters of the current route
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteState {
    /// `?agent=` slug
    pub agent_slug: Option<String>,
    /// `?prompt=` text used to pre-fill the input
    pub prompt: Option<String>,
}

/// Caller-owned session context passed into every operation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatSession {
    /// Active conversation; `None` until the first message creates one
    pub conversation_id: Option<ConversationId>,
    /// Signed-in user, if any
    pub user: Option<User>,
    /// Route state
    pub route: RouteState,
}

impl ChatSession {
    /// Session for an anonymous visitor with no conversation yet
    #[must_use]
    pub fn guest() -> Self {
        Self::default()
    }

    /// Session for a signed-in user
    #[must_use]
    pub fn for_user(user: User) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }

    /// Same session, on another conversation
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: Option<ConversationId>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Same session, with another agent slug
    #[must_use]
    pub fn with_agent_slug(mut self, slug: Option<String>) -> Self {
        self.route.agent_slug = slug;
        self
    }

    fn draft_key(&self) -> DraftKey {
        DraftKey::for_conversation(self.conversation_id.as_ref())
    }
}

/// How one submission attempt ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Another submission was in flight; nothing happened
    Ignored,
    /// No identity could be resolved; nothing was shown
    Aborted,
    /// The optimistic message was removed and the user notified
    RolledBack {
        /// The optimistic id that was removed
        message_id: MessageId,
        /// The notification text
        reason: String,
    },
    /// The exchange took over
    Sent {
        /// The optimistic id that was reconciled
        message_id: MessageId,
        /// Conversation the message went to (possibly just created)
        conversation_id: ConversationId,
    },
}

/// How a reload request ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// No identity could be resolved
    Aborted,
    /// The exchange refused
    Refused(ExchangeError),
    /// The last exchange was issued again
    Reissued {
        /// New exchange generation
        generation: u64,
    },
}

/// External collaborators the Composer depends on
#[derive(Clone)]
pub struct Collaborators {
    /// Guest identity minting
    pub identity: Arc<dyn IdentityProvider>,
    /// Conversation storage and message cache
    pub store: Arc<dyn ConversationStore>,
    /// Daily usage counters
    pub usage: Arc<dyn UsageProvider>,
    /// Attachment upload
    pub uploader: Arc<dyn AttachmentUploader>,
    /// Agent lookup
    pub agents: Arc<dyn AgentDirectory>,
    /// Chat backend
    pub transport: Arc<dyn ChatTransport>,
}

/// Clears the in-flight flag when dropped
struct SubmittingFlag<'a>(&'a AtomicBool);

impl<'a> SubmittingFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SubmittingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Submit,
    Suggestion,
}

struct ComposerState {
    input: String,
    staged: Vec<LocalFile>,
    selected_model: String,
    conversation: Option<Conversation>,
    has_sent_first_message: bool,
    phase: SubmissionPhase,
}

/// Everything one attempt carries from the optimistic insert to its end
struct Attempt {
    flow: Flow,
    text: String,
    files: Vec<LocalFile>,
    placeholders: Vec<PlaceholderAttachment>,
    optimistic_id: MessageId,
}

/// The Composer - submission orchestration for one chat surface
pub struct Composer {
    config: Arc<ComposerConfig>,
    identity: IdentityResolver,
    drafts: DraftStore,
    attachments: AttachmentCoordinator,
    guards: GuardPipeline,
    ledger: Arc<RwLock<MessageLedger>>,
    exchange: Arc<StreamingExchange>,
    agents: AgentResolver,
    store: Arc<dyn ConversationStore>,
    state: Mutex<ComposerState>,
    is_submitting: AtomicBool,
    tx: mpsc::Sender<ComposerEvent>,
}

impl Composer {
    /// Create a Composer
    pub fn new(
        config: ComposerConfig,
        collaborators: Collaborators,
        tx: mpsc::Sender<ComposerEvent>,
    ) -> Self {
        let config = Arc::new(config);
        let ledger = Arc::new(RwLock::new(MessageLedger::new()));
        let exchange = Arc::new(StreamingExchange::new(
            collaborators.transport,
            ledger.clone(),
        ));

        Self {
            identity: IdentityResolver::new(collaborators.identity),
            drafts: DraftStore::new(),
            attachments: AttachmentCoordinator::new(collaborators.uploader),
            guards: GuardPipeline::new(
                collaborators.usage,
                collaborators.store.clone(),
                config.clone(),
            ),
            ledger,
            exchange,
            agents: AgentResolver::new(collaborators.agents),
            store: collaborators.store,
            state: Mutex::new(ComposerState {
                input: String::new(),
                staged: Vec::new(),
                selected_model: config.default_model.clone(),
                conversation: None,
                has_sent_first_message: false,
                phase: SubmissionPhase::Idle,
            }),
            is_submitting: AtomicBool::new(false),
            tx,
            config,
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Send the current input and staged files
    ///
    /// The input is cleared as soon as the attempt starts. If the attempt is
    /// rolled back, the text is put back into the input unless something new
    /// was typed meanwhile. The draft is only cleared on success.
    pub async fn submit(&self, session: &ChatSession) -> SubmitOutcome {
        let Some(_flag) = SubmittingFlag::acquire(&self.is_submitting) else {
            tracing::debug!("Submission already in flight, ignoring");
            return SubmitOutcome::Ignored;
        };

        let Some(identity) = self.resolve_identity(session).await else {
            return SubmitOutcome::Aborted;
        };

        // Free the input immediately; the draft keeps the text until success
        let (text, files) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.input),
                std::mem::take(&mut state.staged),
            )
        };
        let attempt = self.insert_optimistic(Flow::Submit, text, files).await;
        self.run_attempt(session, &identity, attempt).await
    }

    /// Send a suggested prompt with the default system prompt
    ///
    /// The input field, staged files and draft are left alone.
    pub async fn handle_suggestion(&self, session: &ChatSession, text: &str) -> SubmitOutcome {
        let Some(_flag) = SubmittingFlag::acquire(&self.is_submitting) else {
            tracing::debug!("Submission already in flight, ignoring suggestion");
            return SubmitOutcome::Ignored;
        };

        let Some(identity) = self.resolve_identity(session).await else {
            return SubmitOutcome::Aborted;
        };

        let attempt = self
            .insert_optimistic(Flow::Suggestion, text.to_string(), Vec::new())
            .await;
        self.run_attempt(session, &identity, attempt).await
    }

    /// Issue the last exchange again with the current model, agent and prompt
    pub async fn handle_reload(&self, session: &ChatSession) -> ReloadOutcome {
        let Some(identity) = self.identity.resolve(session.user.as_ref()).await else {
            tracing::warn!("Reload aborted: no identity");
            return ReloadOutcome::Aborted;
        };

        let conversation = self.current_conversation(session).await;
        let agent = self.resolve_agent(session, conversation.as_ref()).await;
        let system_prompt = self.system_prompt(session, agent.as_deref());
        let model = self.selected_model();

        let reissued = self.exchange.reload_with(|request| {
            request.user_id = identity.id().to_string();
            request.is_authenticated = identity.is_authenticated();
            request.model = model;
            request.system_prompt = system_prompt;
            request.agent_id = agent.map(|a| a.id.clone());
        });

        match reissued {
            Ok(generation) => {
                let chat_id = self
                    .exchange
                    .last_request()
                    .map(|r| r.chat_id)
                    .or_else(|| session.conversation_id.clone());
                if let Some(chat_id) = chat_id {
                    self.watch_exchange(generation, chat_id);
                }
                tracing::debug!(generation, "Exchange reissued");
                ReloadOutcome::Reissued { generation }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reload refused");
                ReloadOutcome::Refused(e)
            }
        }
    }

    /// Cancel the streaming reply; a no-op when nothing is streaming
    pub fn stop(&self) -> bool {
        self.exchange.stop()
    }

    async fn resolve_identity(&self, session: &ChatSession) -> Option<Identity> {
        self.set_phase(SubmissionPhase::ResolvingIdentity).await;
        let identity = self.identity.resolve(session.user.as_ref()).await;
        if identity.is_none() {
            tracing::warn!("Submission aborted: no identity");
            self.set_phase(SubmissionPhase::Idle).await;
        }
        identity
    }

    async fn insert_optimistic(&self, flow: Flow, text: String, files: Vec<LocalFile>) -> Attempt {
        let placeholders = self.attachments.stage(&files);
        let optimistic = ChatMessage::optimistic(
            text.clone(),
            placeholders.iter().map(PlaceholderAttachment::as_attachment).collect(),
        );
        let optimistic_id = optimistic.id.clone();

        // Ids embed a process-wide counter, so a duplicate is not expected
        if self.ledger.write().insert_optimistic(optimistic) {
            self.send(ComposerEvent::Ledger(LedgerChange::Inserted {
                id: optimistic_id.clone(),
            }))
            .await;
        }

        Attempt {
            flow,
            text,
            files,
            placeholders,
            optimistic_id,
        }
    }

    async fn run_attempt(
        &self,
        session: &ChatSession,
        identity: &Identity,
        attempt: Attempt,
    ) -> SubmitOutcome {
        self.set_phase(SubmissionPhase::CheckingGuards).await;

        let conversation = self.current_conversation(session).await;
        let agent = match attempt.flow {
            Flow::Submit => self.resolve_agent(session, conversation.as_ref()).await,
            Flow::Suggestion => None,
        };
        let system_prompt = match attempt.flow {
            Flow::Submit => self.system_prompt(session, agent.as_deref()),
            Flow::Suggestion => self.config.default_system_prompt.clone(),
        };
        let agent_id = agent.as_ref().map(|a| a.id.clone());
        let model = self.selected_model();

        let cleared = self
            .guards
            .run(GuardInput {
                identity,
                conversation_id: session.conversation_id.as_ref(),
                model: &model,
                agent_id: agent_id.as_ref(),
                system_prompt: &system_prompt,
                input: &attempt.text,
            })
            .await;
        let cleared = match cleared {
            Ok(cleared) => cleared,
            Err(failure) => {
                tracing::warn!(guard = ?failure.guard, reason = %failure.message, "Guard refused submission");
                if failure.auth_prompt {
                    self.send(ComposerEvent::AuthPromptRequested).await;
                }
                return self.roll_back(attempt, failure.message).await;
            }
        };
        for notice in cleared.notices {
            self.send(ComposerEvent::Notify(notice)).await;
        }
        let conversation_id = cleared.conversation_id;

        let persisted = if attempt.files.is_empty() {
            Vec::new()
        } else {
            self.set_phase(SubmissionPhase::UploadingAttachments).await;
            match self
                .attachments
                .upload(identity, &conversation_id, &attempt.files)
                .await
            {
                Some(persisted) => persisted,
                None => return self.roll_back(attempt, UPLOAD_FAILED_MESSAGE.to_string()).await,
            }
        };

        self.set_phase(SubmissionPhase::RequestIssued).await;
        let request = ChatRequest::new(
            conversation_id.clone(),
            identity.id(),
            model.clone(),
            identity.is_authenticated(),
            system_prompt.clone(),
        )
        .with_agent(agent_id.clone())
        .with_attachments(persisted.clone());
        let user_message =
            ChatMessage::new(MessageRole::User, attempt.text.clone()).with_attachments(persisted.clone());

        let generation = match self.exchange.submit(request, user_message.clone()) {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(error = %e, "Exchange refused hand-off");
                return self.roll_back(attempt, SEND_FAILED_MESSAGE.to_string()).await;
            }
        };

        let optimistic_id = attempt.optimistic_id.clone();
        self.reconcile(session, identity, attempt, persisted, &user_message, &conversation_id)
            .await;
        self.remember_conversation(
            conversation,
            Conversation {
                id: conversation_id.clone(),
                owner: identity.id().to_string(),
                model,
                agent_id,
                system_prompt: Some(system_prompt),
            },
        );
        self.watch_exchange(generation, conversation_id.clone());
        self.set_phase(SubmissionPhase::Reconciled).await;

        SubmitOutcome::Sent {
            message_id: optimistic_id,
            conversation_id,
        }
    }

    async fn reconcile(
        &self,
        session: &ChatSession,
        identity: &Identity,
        attempt: Attempt,
        persisted: Vec<PersistedAttachment>,
        user_message: &ChatMessage,
        conversation_id: &ConversationId,
    ) {
        let Attempt {
            flow,
            placeholders,
            optimistic_id,
            ..
        } = attempt;

        self.attachments.promote(placeholders, persisted);
        self.ledger.write().remove_by_id(&optimistic_id);
        self.send(ComposerEvent::Ledger(LedgerChange::Removed {
            id: optimistic_id.clone(),
            cause: RemovalCause::Reconciled,
        }))
        .await;

        if let Err(e) = self.store.cache_message(conversation_id, user_message).await {
            tracing::warn!(error = %e, conversation_id = %conversation_id, "Failed to cache user message");
        }
        if flow == Flow::Submit {
            self.drafts.clear(&session.draft_key());
        }
        self.state.lock().has_sent_first_message = true;

        tracing::info!(
            optimistic_id = %optimistic_id,
            conversation_id = %conversation_id,
            identity = %identity,
            "Submission reconciled"
        );
    }

    async fn roll_back(&self, attempt: Attempt, reason: String) -> SubmitOutcome {
        let Attempt {
            flow,
            text,
            placeholders,
            optimistic_id,
            ..
        } = attempt;

        self.ledger.write().remove_by_id(&optimistic_id);
        self.send(ComposerEvent::Ledger(LedgerChange::Removed {
            id: optimistic_id.clone(),
            cause: RemovalCause::RolledBack,
        }))
        .await;
        self.attachments.release(placeholders);

        if flow == Flow::Submit {
            let mut state = self.state.lock();
            if state.input.is_empty() {
                state.input = text;
            }
        }

        self.send(ComposerEvent::Notify(Notification::error(reason.clone())))
            .await;
        self.set_phase(SubmissionPhase::RolledBack).await;
        tracing::warn!(optimistic_id = %optimistic_id, reason = %reason, "Submission rolled back");

        SubmitOutcome::RolledBack {
            message_id: optimistic_id,
            reason,
        }
    }

    /// Observe one exchange generation until it ends
    fn watch_exchange(&self, generation: u64, conversation_id: ConversationId) {
        let mut rx = self.exchange.subscribe();
        let exchange = self.exchange.clone();
        let store = self.store.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut last_status = None;
            loop {
                let snapshot: ExchangeSnapshot = *rx.borrow_and_update();
                if snapshot.generation != generation {
                    tracing::debug!(generation, "Exchange superseded");
                    return;
                }
                if last_status != Some(snapshot.status) {
                    last_status = Some(snapshot.status);
                    if tx.send(ComposerEvent::Stream(snapshot.status)).await.is_err() {
                        tracing::warn!("Failed to send stream status to surface");
                    }
                }

                match snapshot.status {
                    ExchangeStatus::Ready => {
                        if let Some(reply) = exchange.final_message(generation) {
                            if let Err(e) = store.cache_message(&conversation_id, &reply).await {
                                tracing::warn!(error = %e, conversation_id = %conversation_id, "Failed to cache reply");
                            }
                        }
                        return;
                    }
                    ExchangeStatus::Error => {
                        let text = exchange.error_text(generation).unwrap_or_default();
                        let notification = Notification::error(parse_error_message(&text));
                        if tx.send(ComposerEvent::Notify(notification)).await.is_err() {
                            tracing::warn!("Failed to send error notification to surface");
                        }
                        return;
                    }
                    ExchangeStatus::Stopped | ExchangeStatus::Idle => return,
                    ExchangeStatus::Submitted | ExchangeStatus::Streaming => {}
                }

                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    // =========================================================================
    // Input, attachments and selection
    // =========================================================================

    /// Replace the input text and save it as the draft
    pub fn set_input(&self, session: &ChatSession, text: &str) {
        self.state.lock().input = text.to_string();
        self.drafts.save(&session.draft_key(), text);
    }

    /// Stage files for the next submission
    ///
    /// Returns `false` (with a notification) if the selected model does not
    /// accept files or the batch would exceed the per-message limit.
    pub async fn stage_files(&self, files: Vec<LocalFile>) -> bool {
        let refusal = {
            let mut state = self.state.lock();
            let limit = self.config.daily_file_upload_limit;
            if !self.config.catalog.supports_file_upload(&state.selected_model) {
                Some(FILE_UPLOAD_UNSUPPORTED_MESSAGE.to_string())
            } else if state.staged.len() + files.len() > limit {
                Some(format!("You can attach up to {limit} files per message."))
            } else {
                state.staged.extend(files);
                None
            }
        };

        match refusal {
            Some(reason) => {
                tracing::debug!(reason = %reason, "Files not staged");
                self.send(ComposerEvent::Notify(Notification::error(reason)))
                    .await;
                false
            }
            None => true,
        }
    }

    /// Unstage a file by name
    pub fn remove_staged_file(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.staged.len();
        state.staged.retain(|f| f.name != name);
        state.staged.len() != before
    }

    /// Change the selected model, saving it on the active conversation
    ///
    /// The previous selection is restored if the change cannot be saved.
    pub async fn select_model(&self, session: &ChatSession, model: &str) -> bool {
        let previous = std::mem::replace(&mut self.state.lock().selected_model, model.to_string());

        let Some(conversation_id) = session.conversation_id.as_ref() else {
            return true;
        };
        match self.store.update_model(conversation_id, model).await {
            Ok(()) => {
                let mut state = self.state.lock();
                if let Some(conversation) = state
                    .conversation
                    .as_mut()
                    .filter(|c| &c.id == conversation_id)
                {
                    conversation.model = model.to_string();
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, conversation_id = %conversation_id, "Failed to save model");
                self.state.lock().selected_model = previous;
                self.send(ComposerEvent::Notify(Notification::error(
                    MODEL_UPDATE_FAILED_MESSAGE,
                )))
                .await;
                false
            }
        }
    }

    /// Remove a message from the visible list
    pub async fn delete_message(&self, id: &MessageId) -> bool {
        let removed = self.ledger.write().remove_by_id(id).is_some();
        if removed {
            let count = self.ledger.read().len();
            self.send(ComposerEvent::Ledger(LedgerChange::Replaced { count }))
                .await;
        }
        removed
    }

    /// Replace the text of a message in the visible list
    pub async fn edit_message(&self, id: &MessageId, content: &str) -> bool {
        let edited = self.ledger.write().set_content(id, content.to_string());
        if edited {
            let count = self.ledger.read().len();
            self.send(ComposerEvent::Ledger(LedgerChange::Replaced { count }))
                .await;
        }
        edited
    }

    // =========================================================================
    // Conversation and route changes
    // =========================================================================

    /// Switch to a conversation (or to a new, empty one)
    ///
    /// Replaces the visible messages, restores the draft, picks the model and
    /// re-derives the current agent.
    pub async fn open_conversation(&self, session: &ChatSession, messages: Vec<ChatMessage>) {
        self.exchange.reset();
        let messages = if session.conversation_id.is_some() {
            messages
        } else {
            Vec::new()
        };
        let count = messages.len();
        self.ledger.write().replace_all(messages);
        self.send(ComposerEvent::Ledger(LedgerChange::Replaced { count }))
            .await;

        let conversation = match session.conversation_id.as_ref() {
            Some(id) => self.fetch_conversation(id).await,
            None => None,
        };
        let model = conversation
            .as_ref()
            .map(|c| c.model.clone())
            .or_else(|| session.user.as_ref().and_then(|u| u.preferred_model.clone()))
            .unwrap_or_else(|| self.config.default_model.clone());

        {
            let mut state = self.state.lock();
            state.input = self.drafts.load(&session.draft_key());
            state.has_sent_first_message = false;
            state.selected_model = model;
            state.conversation = conversation.clone();
        }

        self.resolve_agent(session, conversation.as_ref()).await;
        tracing::debug!(conversation_id = ?session.conversation_id, count, "Conversation opened");
    }

    /// React to route changes: pre-fill the input and re-derive the agent
    pub async fn apply_route(&self, session: &ChatSession) -> Option<Arc<Agent>> {
        if let Some(prompt) = session.route.prompt.as_ref() {
            self.state.lock().input = prompt.clone();
        }
        let conversation = self.current_conversation(session).await;
        self.resolve_agent(session, conversation.as_ref()).await
    }

    /// Load the curated agents and the signed-in user's own agents
    pub async fn refresh_agents(&self, session: &ChatSession) {
        let identity = session
            .user
            .as_ref()
            .map(|u| Identity::authenticated(u.id.clone()));
        self.agents.refresh(identity.as_ref()).await;
    }

    async fn resolve_agent(
        &self,
        session: &ChatSession,
        conversation: Option<&Conversation>,
    ) -> Option<Arc<Agent>> {
        self.agents
            .resolve(
                session.route.agent_slug.as_deref(),
                conversation.and_then(|c| c.agent_id.as_ref()),
            )
            .await
    }

    fn system_prompt(&self, session: &ChatSession, agent: Option<&Agent>) -> String {
        agent
            .map(|a| a.system_prompt.clone())
            .filter(|p| !p.is_empty())
            .or_else(|| {
                session
                    .user
                    .as_ref()
                    .and_then(|u| u.system_prompt.clone())
                    .filter(|p| !p.is_empty())
            })
            .unwrap_or_else(|| self.config.default_system_prompt.clone())
    }

    async fn current_conversation(&self, session: &ChatSession) -> Option<Conversation> {
        let id = session.conversation_id.as_ref()?;
        let cached = self.state.lock().conversation.clone();
        match cached {
            Some(conversation) if &conversation.id == id => Some(conversation),
            _ => {
                let fetched = self.fetch_conversation(id).await;
                if fetched.is_some() {
                    self.state.lock().conversation = fetched.clone();
                }
                fetched
            }
        }
    }

    async fn fetch_conversation(&self, id: &ConversationId) -> Option<Conversation> {
        match self.store.get_conversation_by_id(id).await {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!(error = %e, conversation_id = %id, "Conversation lookup failed");
                None
            }
        }
    }

    fn remember_conversation(&self, existing: Option<Conversation>, created: Conversation) {
        self.state.lock().conversation = Some(existing.unwrap_or(created));
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Current input text
    #[must_use]
    pub fn input(&self) -> String {
        self.state.lock().input.clone()
    }

    /// Names of the staged files
    #[must_use]
    pub fn staged_files(&self) -> Vec<String> {
        self.state.lock().staged.iter().map(|f| f.name.clone()).collect()
    }

    /// Selected model
    #[must_use]
    pub fn selected_model(&self) -> String {
        self.state.lock().selected_model.clone()
    }

    /// Current submission phase
    #[must_use]
    pub fn phase(&self) -> SubmissionPhase {
        self.state.lock().phase
    }

    /// Whether a submission holds the in-flight flag
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.is_submitting.load(Ordering::SeqCst)
    }

    /// Whether a message was sent since the conversation was opened
    #[must_use]
    pub fn has_sent_first_message(&self) -> bool {
        self.state.lock().has_sent_first_message
    }

    /// Visible messages
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.ledger.read().snapshot()
    }

    /// The current agent
    #[must_use]
    pub fn current_agent(&self) -> Option<Arc<Agent>> {
        self.agents.current()
    }

    /// Streaming exchange status
    #[must_use]
    pub fn exchange_status(&self) -> ExchangeStatus {
        self.exchange.status()
    }

    /// Watch streaming exchange status
    pub fn subscribe_exchange(&self) -> tokio::sync::watch::Receiver<ExchangeSnapshot> {
        self.exchange.subscribe()
    }

    /// Attachment conservation counters
    #[must_use]
    pub fn attachment_stats(&self) -> AttachmentStats {
        self.attachments.stats()
    }

    /// Draft store, for snapshotting across restarts
    #[must_use]
    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    async fn set_phase(&self, phase: SubmissionPhase) {
        self.state.lock().phase = phase;
        tracing::debug!(phase = phase.description(), "Submission phase");
        self.send(ComposerEvent::Phase(phase)).await;
    }

    /// Send an event to the UI surface
    async fn send(&self, event: ComposerEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::warn!("Failed to send event to surface: {}", e);
        }
    }
}
