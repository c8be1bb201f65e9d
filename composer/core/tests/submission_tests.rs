//! Integration tests for the submission pipeline
//!
//! These tests drive a [`Composer`] wired to the in-memory collaborators and
//! verify the observable contract of one submission.
//! Tests cover:
//! - Single-flight submission under concurrent sends
//! - Optimistic insert and removal symmetry on success and rollback
//! - Attachment conservation across promote and release
//! - Usage, conversation and length guards
//! - Per-conversation drafts across conversation switches
//! - Agent re-derivation from the route and the stored conversation
//! - Suggestion flow and model selection

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use composer_core::composer::{
    FILE_UPLOAD_UNSUPPORTED_MESSAGE, MODEL_UPDATE_FAILED_MESSAGE, SEND_FAILED_MESSAGE,
    UPLOAD_FAILED_MESSAGE,
};
use composer_core::guards::{
    CONVERSATION_FAILED_MESSAGE, GUEST_LIMIT_MESSAGE, PRO_LIMIT_MESSAGE, USAGE_UNAVAILABLE_MESSAGE,
};
use composer_core::memory::{
    DailyUsageTracker, EchoMode, EchoTransport, MemoryAgentDirectory, MemoryAttachmentUploader,
    MemoryConversationStore, MemoryIdentityProvider,
};
use composer_core::{
    Agent, AgentId, AgentScope, ChatSession, Collaborators, Composer, ComposerConfig,
    ComposerEvent, Conversation, ConversationId, DraftKey, ExchangeStatus, IdentityProvider,
    LedgerChange, LocalFile, MessageRole, NotifyLevel, RemovalCause, SubmissionPhase,
    SubmitOutcome, User,
};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    composer: Composer,
    events: mpsc::Receiver<ComposerEvent>,
    identity: Arc<MemoryIdentityProvider>,
    store: Arc<MemoryConversationStore>,
    usage: Arc<DailyUsageTracker>,
    uploader: Arc<MemoryAttachmentUploader>,
    agents: Arc<MemoryAgentDirectory>,
    transport: Arc<EchoTransport>,
}

impl Harness {
    fn new() -> Self {
        Self::with_usage(DailyUsageTracker::new())
    }

    fn with_usage(usage: DailyUsageTracker) -> Self {
        let config = ComposerConfig::default();
        let usage = Arc::new(usage);
        let identity = Arc::new(MemoryIdentityProvider::new());
        let store = Arc::new(MemoryConversationStore::new());
        let uploader = Arc::new(MemoryAttachmentUploader::new());
        let agents = Arc::new(MemoryAgentDirectory::new());
        let transport =
            Arc::new(EchoTransport::new().with_usage(usage.clone(), config.catalog.clone()));

        let (tx, events) = mpsc::channel(256);
        let collaborators = Collaborators {
            identity: identity.clone(),
            store: store.clone(),
            usage: usage.clone(),
            uploader: uploader.clone(),
            agents: agents.clone(),
            transport: transport.clone(),
        };

        Self {
            composer: Composer::new(config, collaborators, tx),
            events,
            identity,
            store,
            usage,
            uploader,
            agents,
            transport,
        }
    }

    /// Everything emitted so far
    fn drain(&mut self) -> Vec<ComposerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Titles of the notifications emitted so far
    fn notifications(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                ComposerEvent::Notify(n) => Some(n.title),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_status(&self, wanted: ExchangeStatus) {
        let mut rx = self.composer.subscribe_exchange();
        timeout(Duration::from_secs(2), async {
            loop {
                if rx.borrow_and_update().status == wanted {
                    return;
                }
                rx.changed().await.expect("exchange dropped");
            }
        })
        .await
        .expect("timed out waiting for exchange status");
    }

    async fn wait_for_cached(&self, conversation_id: &ConversationId, count: usize) {
        timeout(Duration::from_secs(2), async {
            while self.store.cached_messages(conversation_id).len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for cached messages");
    }

    async fn guest_id(&self) -> String {
        self.identity.get_or_create_guest().await.unwrap()
    }
}

fn file(name: &str) -> LocalFile {
    LocalFile::new(name, "image/png", vec![0x89, 0x50, 0x4e, 0x47])
}

fn agent(id: &str, slug: &str, prompt: &str) -> Agent {
    Agent {
        id: AgentId::new(id),
        slug: slug.to_string(),
        name: slug.to_uppercase(),
        system_prompt: prompt.to_string(),
        scope: AgentScope::Curated,
        creator_id: None,
    }
}

fn conversation(id: &str, model: &str, agent_id: Option<&str>) -> Conversation {
    Conversation {
        id: ConversationId::new(id),
        owner: "u1".to_string(),
        model: model.to_string(),
        agent_id: agent_id.map(AgentId::new),
        system_prompt: None,
    }
}

fn sent(outcome: &SubmitOutcome) -> (composer_core::MessageId, ConversationId) {
    match outcome {
        SubmitOutcome::Sent {
            message_id,
            conversation_id,
        } => (message_id.clone(), conversation_id.clone()),
        other => panic!("expected Sent, got {other:?}"),
    }
}

fn rolled_back(outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::RolledBack { reason, .. } => reason.clone(),
        other => panic!("expected RolledBack, got {other:?}"),
    }
}

// =============================================================================
// Happy path
// =============================================================================

/// A guest submission creates a conversation, reconciles the optimistic
/// message and ends with the echoed reply cached next to the user message.
#[tokio::test]
async fn test_guest_submission_end_to_end() {
    let mut h = Harness::new();
    let session = ChatSession::guest();

    h.composer.set_input(&session, "Hello there");
    let outcome = h.composer.submit(&session).await;
    let (message_id, conversation_id) = sent(&outcome);

    assert!(message_id.is_optimistic());
    assert_eq!(h.store.conversation_count(), 1);
    assert_eq!(h.composer.input(), "");
    assert_eq!(h.composer.drafts().load(&DraftKey::New), "");
    assert!(h.composer.has_sent_first_message());
    assert_eq!(h.composer.phase(), SubmissionPhase::Reconciled);
    assert!(!h.composer.is_submitting());

    let ledger_events: Vec<_> = h
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ComposerEvent::Ledger(change) => Some(change),
            _ => None,
        })
        .collect();
    assert_eq!(
        ledger_events,
        vec![
            LedgerChange::Inserted {
                id: message_id.clone()
            },
            LedgerChange::Removed {
                id: message_id,
                cause: RemovalCause::Reconciled
            },
        ]
    );

    h.wait_for_status(ExchangeStatus::Ready).await;
    let messages = h.composer.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| !m.is_optimistic()));
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "Hello there");

    h.wait_for_cached(&conversation_id, 2).await;
    let cached = h.store.cached_messages(&conversation_id);
    assert_eq!(cached[0].content, "Hello there");
    assert_eq!(cached[1].role, MessageRole::Assistant);

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].chat_id, conversation_id);
    assert!(!requests[0].is_authenticated);
    assert_eq!(requests[0].user_id, h.guest_id().await);
    assert_eq!(
        requests[0].system_prompt,
        h.composer.config().default_system_prompt
    );
}

/// Phases are reported in pipeline order.
#[tokio::test]
async fn test_phases_reported_in_order() {
    let mut h = Harness::new();
    let session = ChatSession::guest();
    h.composer.set_input(&session, "hi");
    h.composer.stage_files(vec![file("a.png")]).await;

    sent(&h.composer.submit(&session).await);

    let phases: Vec<_> = h
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ComposerEvent::Phase(phase) => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            SubmissionPhase::ResolvingIdentity,
            SubmissionPhase::CheckingGuards,
            SubmissionPhase::UploadingAttachments,
            SubmissionPhase::RequestIssued,
            SubmissionPhase::Reconciled,
        ]
    );
}

// =============================================================================
// Single flight
// =============================================================================

/// A second send while the first is suspended in the guards is ignored.
#[tokio::test]
async fn test_concurrent_submit_is_ignored() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::with_usage(DailyUsageTracker::new().with_gate(gate.clone()));
    let session = ChatSession::guest();
    h.composer.set_input(&session, "first");

    let (first, second) = tokio::join!(h.composer.submit(&session), async {
        let outcome = h.composer.submit(&session).await;
        gate.notify_one();
        outcome
    });

    assert_eq!(second, SubmitOutcome::Ignored);
    sent(&first);
    assert!(!h.composer.is_submitting());
    assert_eq!(h.transport.requests().len(), 1);

    let inserted = h
        .drain()
        .into_iter()
        .filter(|event| matches!(event, ComposerEvent::Ledger(LedgerChange::Inserted { .. })))
        .count();
    assert_eq!(inserted, 1);
}

/// A guest identity failure aborts without showing anything.
#[tokio::test]
async fn test_identity_failure_aborts_silently() {
    let mut h = Harness::new();
    let session = ChatSession::guest();
    h.identity.fail_next(1);
    h.composer.set_input(&session, "hi");

    assert_eq!(h.composer.submit(&session).await, SubmitOutcome::Aborted);
    assert_eq!(h.composer.input(), "hi");
    assert!(h.composer.messages().is_empty());
    assert!(!h.composer.is_submitting());
    assert!(!h
        .drain()
        .iter()
        .any(|event| matches!(event, ComposerEvent::Ledger(_) | ComposerEvent::Notify(_))));

    // The failure is not memoized
    sent(&h.composer.submit(&session).await);
    assert_eq!(h.identity.calls(), 2);
}

// =============================================================================
// Guards and rollback
// =============================================================================

/// A failed conversation creation removes the optimistic message and
/// restores the input.
#[tokio::test]
async fn test_conversation_failure_rolls_back() {
    let mut h = Harness::new();
    let session = ChatSession::guest();
    h.store.fail_creates(true);
    h.composer.set_input(&session, "hello");

    let outcome = h.composer.submit(&session).await;
    assert_eq!(rolled_back(&outcome), CONVERSATION_FAILED_MESSAGE);

    assert!(h.composer.messages().is_empty());
    assert_eq!(h.composer.input(), "hello");
    assert_eq!(h.composer.drafts().load(&DraftKey::New), "hello");
    assert_eq!(h.composer.phase(), SubmissionPhase::RolledBack);
    assert!(h.transport.requests().is_empty());
    assert!(!h.composer.is_submitting());

    let events = h.drain();
    let SubmitOutcome::RolledBack { message_id, .. } = outcome else {
        unreachable!()
    };
    assert!(events.contains(&ComposerEvent::Ledger(LedgerChange::Removed {
        id: message_id,
        cause: RemovalCause::RolledBack,
    })));
    assert!(events.iter().any(|event| matches!(
        event,
        ComposerEvent::Notify(n) if n.status == NotifyLevel::Error && n.title == CONVERSATION_FAILED_MESSAGE
    )));
}

/// A guest over quota is refused before any request and offered sign-in.
#[tokio::test]
async fn test_guest_quota_enforced() {
    let mut h = Harness::new();
    let session = ChatSession::guest();
    let guest = h.guest_id().await;
    for _ in 0..h.composer.config().guest_daily_message_limit {
        h.usage.record(&guest, false);
    }

    h.composer.set_input(&session, "one more");
    let outcome = h.composer.submit(&session).await;

    assert_eq!(rolled_back(&outcome), GUEST_LIMIT_MESSAGE);
    assert!(h.transport.requests().is_empty());
    assert_eq!(h.store.conversation_count(), 0);
    assert!(h.drain().contains(&ComposerEvent::AuthPromptRequested));
}

/// The last messages of the day come with a remaining-queries notice.
#[tokio::test]
async fn test_remaining_queries_notice() {
    let mut h = Harness::new();
    let session = ChatSession::guest();
    let guest = h.guest_id().await;
    h.usage.record(&guest, false);
    h.usage.record(&guest, false);

    h.composer.set_input(&session, "hi");
    sent(&h.composer.submit(&session).await);

    assert!(h
        .notifications()
        .contains(&"Only 2 queries remaining today.".to_string()));
}

/// Pro models have their own, smaller quota and no sign-in prompt.
#[tokio::test]
async fn test_pro_quota_enforced_for_users() {
    let mut h = Harness::new();
    let session = ChatSession::for_user(User::new("u1"));
    assert!(h.composer.select_model(&session, "gpt-4.1").await);
    for _ in 0..h.composer.config().pro_daily_message_limit {
        h.usage.record("u1", true);
    }

    h.composer.set_input(&session, "hi");
    let outcome = h.composer.submit(&session).await;

    assert_eq!(rolled_back(&outcome), PRO_LIMIT_MESSAGE);
    assert!(!h.drain().contains(&ComposerEvent::AuthPromptRequested));

    // A free model still works
    assert!(h.composer.select_model(&session, "gpt-4.1-nano").await);
    h.composer.set_input(&session, "hi");
    sent(&h.composer.submit(&session).await);
}

/// An unavailable usage service refuses the submission.
#[tokio::test]
async fn test_usage_unavailable_rolls_back() {
    let h = Harness::new();
    let session = ChatSession::guest();
    h.usage.set_unavailable(true);
    h.composer.set_input(&session, "hi");

    let outcome = h.composer.submit(&session).await;
    assert_eq!(rolled_back(&outcome), USAGE_UNAVAILABLE_MESSAGE);
}

/// Input of exactly the maximum length is accepted; one more is refused.
#[tokio::test]
async fn test_input_length_boundary() {
    let h = Harness::new();
    let max = h.composer.config().max_input_length;

    // Characters, not bytes
    let session = ChatSession::guest();
    h.composer.set_input(&session, &"é".repeat(max));
    let (_, conversation_id) = sent(&h.composer.submit(&session).await);
    h.wait_for_status(ExchangeStatus::Ready).await;

    let session = session.with_conversation(Some(conversation_id));
    h.composer.set_input(&session, &"a".repeat(max + 1));
    let reason = rolled_back(&h.composer.submit(&session).await);
    assert!(reason.contains(&format!("(Max {max} characters)")));
    assert_eq!(h.composer.input().chars().count(), max + 1);
    assert_eq!(h.transport.requests().len(), 1);
}

/// A busy exchange refuses the hand-off and the message is rolled back.
#[tokio::test]
async fn test_handoff_refused_while_streaming() {
    let h = Harness::new();
    h.transport.set_mode(EchoMode::Stall);
    let session = ChatSession::guest();

    h.composer.set_input(&session, "first");
    let (_, conversation_id) = sent(&h.composer.submit(&session).await);
    assert!(h.composer.exchange_status().is_in_flight());

    let session = session.with_conversation(Some(conversation_id));
    h.composer.set_input(&session, "second");
    let outcome = h.composer.submit(&session).await;

    assert_eq!(rolled_back(&outcome), SEND_FAILED_MESSAGE);
    let messages = h.composer.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "first");
    assert_eq!(h.composer.input(), "second");
}

// =============================================================================
// Attachments
// =============================================================================

/// Uploaded files replace their previews on the request and the message.
#[tokio::test]
async fn test_attachments_promoted_on_success() {
    let h = Harness::new();
    let session = ChatSession::guest();
    h.composer.set_input(&session, "look");
    assert!(h.composer.stage_files(vec![file("a.png"), file("b.png")]).await);

    sent(&h.composer.submit(&session).await);

    let stats = h.composer.attachment_stats();
    assert_eq!(stats.staged, 2);
    assert_eq!(stats.promoted, 2);
    assert_eq!(stats.released, 0);
    assert_eq!(stats.live_previews, 0);
    assert!(h.composer.staged_files().is_empty());
    assert_eq!(h.uploader.uploads(), 2);

    let request = &h.transport.requests()[0];
    assert_eq!(request.attachments.len(), 2);
    assert!(request
        .attachments
        .iter()
        .all(|a| a.url.starts_with("memory://")));

    let user_message = &h.composer.messages()[0];
    assert_eq!(user_message.attachments, request.attachments);
}

/// A partial upload rolls back and releases every preview.
#[tokio::test]
async fn test_partial_upload_rolls_back() {
    let h = Harness::new();
    let session = ChatSession::guest();
    h.uploader.fail_file("b.png");
    h.composer.set_input(&session, "look");
    h.composer.stage_files(vec![file("a.png"), file("b.png")]).await;

    let outcome = h.composer.submit(&session).await;
    assert_eq!(rolled_back(&outcome), UPLOAD_FAILED_MESSAGE);

    let stats = h.composer.attachment_stats();
    assert_eq!(stats.staged, 2);
    assert_eq!(stats.promoted, 0);
    assert_eq!(stats.released, 2);
    assert_eq!(stats.live_previews, 0);
    assert!(h.composer.messages().is_empty());
    assert!(h.transport.requests().is_empty());
    assert_eq!(h.composer.input(), "look");
}

/// Models without file support refuse staging.
#[tokio::test]
async fn test_staging_refused_for_text_only_model() {
    let mut h = Harness::new();
    let session = ChatSession::guest();
    h.composer.select_model(&session, "mistral-large-latest").await;

    assert!(!h.composer.stage_files(vec![file("a.png")]).await);
    assert!(h.composer.staged_files().is_empty());
    assert_eq!(
        h.notifications(),
        vec![FILE_UPLOAD_UNSUPPORTED_MESSAGE.to_string()]
    );
}

// =============================================================================
// Drafts
// =============================================================================

/// Each conversation keeps its own draft across switches.
#[tokio::test]
async fn test_drafts_follow_conversations() {
    let h = Harness::new();
    h.store.insert(conversation("c1", "deepseek-r1", None));
    h.store.insert(conversation("c2", "gpt-4.1", None));
    let user = ChatSession::for_user(User::new("u1"));
    let c1 = user.clone().with_conversation(Some(ConversationId::new("c1")));
    let c2 = user.with_conversation(Some(ConversationId::new("c2")));

    h.composer.open_conversation(&c1, Vec::new()).await;
    assert_eq!(h.composer.selected_model(), "deepseek-r1");
    h.composer.set_input(&c1, "alpha");

    h.composer.open_conversation(&c2, Vec::new()).await;
    assert_eq!(h.composer.input(), "");
    assert_eq!(h.composer.selected_model(), "gpt-4.1");
    h.composer.set_input(&c2, "beta");

    h.composer.open_conversation(&c1, Vec::new()).await;
    assert_eq!(h.composer.input(), "alpha");

    sent(&h.composer.submit(&c1).await);
    assert_eq!(h.composer.drafts().load(&DraftKey::for_conversation(c1.conversation_id.as_ref())), "");

    h.composer.open_conversation(&c2, Vec::new()).await;
    assert_eq!(h.composer.input(), "beta");
}

/// Opening a conversation shows its messages and resets per-conversation state.
#[tokio::test]
async fn test_open_conversation_replaces_messages() {
    let mut h = Harness::new();
    h.store.insert(conversation("c1", "deepseek-r1", None));
    let session = ChatSession::guest().with_conversation(Some(ConversationId::new("c1")));
    let history = vec![
        composer_core::ChatMessage::new(MessageRole::User, "earlier"),
        composer_core::ChatMessage::new(MessageRole::Assistant, "reply"),
    ];

    h.composer.open_conversation(&session, history).await;

    assert_eq!(h.composer.messages().len(), 2);
    assert!(!h.composer.has_sent_first_message());
    assert_eq!(h.composer.exchange_status(), ExchangeStatus::Idle);
    assert!(h
        .drain()
        .contains(&ComposerEvent::Ledger(LedgerChange::Replaced { count: 2 })));

    // A new conversation starts empty whatever the caller passes
    h.composer
        .open_conversation(
            &ChatSession::guest(),
            vec![composer_core::ChatMessage::new(MessageRole::User, "stale")],
        )
        .await;
    assert!(h.composer.messages().is_empty());
    assert_eq!(h.composer.selected_model(), h.composer.config().default_model);
}

// =============================================================================
// Agents
// =============================================================================

/// The route's agent supplies the system prompt and the agent id.
#[tokio::test]
async fn test_route_agent_applied_to_request() {
    let h = Harness::new();
    h.agents.add(agent("agent-research", "research", "You research."));
    let session = ChatSession::guest().with_agent_slug(Some("research".to_string()));

    let current = h.composer.apply_route(&session).await;
    assert_eq!(current.map(|a| a.slug.clone()), Some("research".to_string()));

    h.composer.set_input(&session, "find papers");
    sent(&h.composer.submit(&session).await);

    let request = &h.transport.requests()[0];
    assert_eq!(request.agent_id, Some(AgentId::new("agent-research")));
    assert_eq!(request.system_prompt, "You research.");
}

/// A stored conversation's agent wins over the route's slug.
#[tokio::test]
async fn test_conversation_agent_overrides_route() {
    let h = Harness::new();
    h.agents.add(agent("agent-research", "research", "You research."));
    h.agents.add(agent("agent-writer", "writer", "You write."));
    h.store.insert(conversation("c1", "deepseek-r1", Some("agent-writer")));

    let session = ChatSession::guest().with_agent_slug(Some("research".to_string()));
    h.composer.apply_route(&session).await;
    assert_eq!(
        h.composer.current_agent().map(|a| a.id.clone()),
        Some(AgentId::new("agent-research"))
    );

    let session = session.with_conversation(Some(ConversationId::new("c1")));
    h.composer.open_conversation(&session, Vec::new()).await;
    assert_eq!(
        h.composer.current_agent().map(|a| a.id.clone()),
        Some(AgentId::new("agent-writer"))
    );

    // Same inputs resolve from memory
    let fetches = h.agents.fetches();
    h.composer.apply_route(&session).await;
    assert_eq!(h.agents.fetches(), fetches);
}

/// A route prompt pre-fills the input.
#[tokio::test]
async fn test_route_prompt_prefills_input() {
    let h = Harness::new();
    let mut session = ChatSession::guest();
    session.route.prompt = Some("Summarize this".to_string());

    h.composer.apply_route(&session).await;
    assert_eq!(h.composer.input(), "Summarize this");
}

// =============================================================================
// Suggestions and model selection
// =============================================================================

/// Suggestions leave the input alone and ignore agent and user prompts.
#[tokio::test]
async fn test_suggestion_uses_default_prompt() {
    let h = Harness::new();
    h.agents.add(agent("agent-research", "research", "You research."));
    let mut user = User::new("u1");
    user.system_prompt = Some("Be brief.".to_string());
    let session =
        ChatSession::for_user(user).with_agent_slug(Some("research".to_string()));

    h.composer.set_input(&session, "my draft");
    sent(&h.composer.handle_suggestion(&session, "Tell me a joke").await);

    assert_eq!(h.composer.input(), "my draft");
    assert_eq!(h.composer.drafts().load(&DraftKey::New), "my draft");

    let request = &h.transport.requests()[0];
    assert_eq!(request.system_prompt, h.composer.config().default_system_prompt);
    assert_eq!(request.agent_id, None);
    assert!(request.is_authenticated);
    assert_eq!(
        request.last_user_message().map(|m| m.content.as_str()),
        Some("Tell me a joke")
    );
}

/// A model change that cannot be saved is reverted.
#[tokio::test]
async fn test_select_model_reverts_on_failure() {
    let mut h = Harness::new();
    let session = ChatSession::guest().with_conversation(Some(ConversationId::new("missing")));
    let before = h.composer.selected_model();

    assert!(!h.composer.select_model(&session, "deepseek-r1").await);
    assert_eq!(h.composer.selected_model(), before);
    assert_eq!(h.notifications(), vec![MODEL_UPDATE_FAILED_MESSAGE.to_string()]);
}
