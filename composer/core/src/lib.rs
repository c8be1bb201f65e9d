//! Composer Core - Headless Submission Orchestration for Chat Surfaces
//!
//! This crate governs the lifecycle of one chat submission, from the moment
//! the user presses send to the moment the backend's streaming reply takes
//! over, independent of any UI framework.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         UI Surface                               │
//! │     renders ComposerEvent (down) · calls Composer methods (up)   │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                        COMPOSER CORE                             │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                         Composer                            │  │
//! │  │  ┌──────────┐ ┌────────┐ ┌─────────────┐ ┌───────────────┐  │  │
//! │  │  │ Identity │ │ Guards │ │ Attachments │ │ Agent resolver│  │  │
//! │  │  └──────────┘ └────────┘ └─────────────┘ └───────────────┘  │  │
//! │  │  ┌──────────┐ ┌───────────────────────┐ ┌───────────────┐   │  │
//! │  │  │  Drafts  │ │ Ledger ◀── Exchange   │ │   Transport   │   │  │
//! │  │  └──────────┘ └───────────────────────┘ └───────────────┘   │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Composer`]: the submission orchestrator
//! - [`ComposerEvent`]: everything the surface needs to render
//! - [`ChatSession`]: caller-owned conversation and route context
//! - [`StreamingExchange`]: the request/response state machine
//! - [`MessageLedger`]: the visible message list
//!
//! # Quick Start
//!
//! ```ignore
//! use composer_core::{memory, ChatSession, Collaborators, Composer, ComposerConfig};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::channel(100);
//! let collaborators = Collaborators {
//!     identity: Arc::new(memory::MemoryIdentityProvider::new()),
//!     store: Arc::new(memory::MemoryConversationStore::new()),
//!     usage: Arc::new(memory::DailyUsageTracker::new()),
//!     uploader: Arc::new(memory::MemoryAttachmentUploader::new()),
//!     agents: Arc::new(memory::MemoryAgentDirectory::new()),
//!     transport: Arc::new(memory::EchoTransport::new()),
//! };
//! let composer = Composer::new(ComposerConfig::default(), collaborators, tx);
//!
//! let session = ChatSession::guest();
//! composer.set_input(&session, "Hello!");
//! let outcome = composer.submit(&session).await;
//! ```
//!
//! # Module Overview
//!
//! - [`composer`]: the orchestrator
//! - [`identity`]: guest and signed-in identities
//! - [`draft`]: per-conversation input drafts
//! - [`attachments`]: staging, upload and preview handles
//! - [`guards`]: usage, conversation and length checks
//! - [`ledger`]: optimistic and confirmed messages
//! - [`streaming`]: the streaming exchange
//! - [`transport`]: chat backend abstraction
//! - [`agent`]: current agent resolution
//! - [`storage`]: conversation storage collaborator
//! - [`memory`]: in-memory collaborators
//! - [`config`]: layered configuration
//! - [`messages`]: ids, messages and events

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod attachments;
pub mod composer;
pub mod config;
pub mod draft;
pub mod guards;
pub mod identity;
pub mod ledger;
pub mod memory;
pub mod messages;
pub mod storage;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use agent::{Agent, AgentDirectory, AgentId, AgentResolver, AgentScope};
pub use attachments::{
    AttachmentCoordinator, AttachmentStats, AttachmentUploader, LocalFile, PersistedAttachment,
    PlaceholderAttachment,
};
pub use composer::{ChatSession, Collaborators, Composer, ReloadOutcome, RouteState, SubmitOutcome};
pub use draft::{DraftError, DraftKey, DraftStore};
pub use guards::{
    GuardFailure, GuardKind, GuardPipeline, UsageProvider, UsageSnapshot,
};
pub use identity::{Identity, IdentityProvider, IdentityResolver, User};
pub use ledger::MessageLedger;
pub use messages::{
    Attachment, ChatMessage, ComposerEvent, ConversationId, LedgerChange, MessageId, MessageRole,
    Notification, NotifyLevel, RemovalCause, SubmissionPhase,
};
pub use storage::{Conversation, ConversationStore, NewConversation};
pub use streaming::{
    parse_error_message, ExchangeError, ExchangeSnapshot, ExchangeStatus, StreamingExchange,
};
pub use transport::{ChatRequest, ChatTransport, HttpTransport, StreamingToken};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ComposerConfig, ComposerToml,
    ConfigError, ConfigOverrides, ConfigSource, ModelCatalog, ModelSpec,
};
