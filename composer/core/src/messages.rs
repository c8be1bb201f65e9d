//! Composer Messages
//!
//! Identifiers, chat messages and the events the Composer emits to the UI
//! surface that renders it.
//!
//! # Design Philosophy
//!
//! The surface is a pure renderer. Everything it needs to draw the message
//! list, show a toast or open the sign-in dialog arrives as a [`ComposerEvent`]
//! on one channel, so a TUI, a desktop shell or a test harness can all drive
//! the same core.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::streaming::ExchangeStatus;

/// Prefix marking a locally minted, not yet confirmed message id
pub const OPTIMISTIC_PREFIX: &str = "optimistic-";

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID for a confirmed message
    pub fn new() -> Self {
        let id = MESSAGE_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }

    /// Mint an id for a speculative message
    ///
    /// The counter suffix keeps ids unique when two are minted in the same
    /// millisecond.
    pub fn optimistic() -> Self {
        let count = MESSAGE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let millis = Utc::now().timestamp_millis();
        Self(format!("{OPTIMISTIC_PREFIX}{millis}-{count}"))
    }

    /// Whether this id marks a speculative message
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.0.starts_with(OPTIMISTIC_PREFIX)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation identifier, assigned by the storage collaborator
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Wrap a storage-assigned id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Assistant response
    Assistant,
}

/// Attachment reference carried by a message
///
/// For an optimistic message the url is a local preview handle; for a
/// confirmed one it is the durable URI returned by the upload collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Original file name
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// Preview handle or durable URI
    pub url: String,
}

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// Ordered attachment references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            attachments: Vec::new(),
        }
    }

    /// Create a speculative user message
    pub fn optimistic(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: MessageId::optimistic(),
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            attachments,
        }
    }

    /// Attach references to this message
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Whether this message is speculative
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.id.is_optimistic()
    }
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Success
    Success,
}

/// A user-visible notification (toast)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Text shown to the user
    pub title: String,
    /// Severity
    pub status: NotifyLevel,
}

impl Notification {
    /// Error notification
    pub fn error(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: NotifyLevel::Error,
        }
    }

    /// Informational notification
    pub fn info(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: NotifyLevel::Info,
        }
    }
}

/// Phases of one submission attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionPhase {
    /// No submission in progress
    Idle,
    /// Waiting on the identity collaborator
    ResolvingIdentity,
    /// Running the guard pipeline
    CheckingGuards,
    /// Uploading staged files
    UploadingAttachments,
    /// Request handed to the streaming exchange
    RequestIssued,
    /// Optimistic state replaced by the exchange's own messages
    Reconciled,
    /// Optimistic state undone after a failure
    RolledBack,
}

impl SubmissionPhase {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::ResolvingIdentity => "Resolving identity...",
            Self::CheckingGuards => "Checking limits...",
            Self::UploadingAttachments => "Uploading files...",
            Self::RequestIssued => "Sending...",
            Self::Reconciled => "Sent",
            Self::RolledBack => "Not sent",
        }
    }
}

/// Why an optimistic message left the ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalCause {
    /// The exchange took over after a successful hand-off
    Reconciled,
    /// A guard, the upload or the hand-off failed
    RolledBack,
}

/// Changes to the visible message list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerChange {
    /// An optimistic message was appended
    Inserted {
        /// The optimistic id
        id: MessageId,
    },
    /// An optimistic message was removed
    Removed {
        /// The optimistic id
        id: MessageId,
        /// What removed it
        cause: RemovalCause,
    },
    /// The whole list was replaced
    Replaced {
        /// New message count
        count: usize,
    },
}

/// Events from the Composer to the UI surface
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ComposerEvent {
    /// Show a toast
    Notify(Notification),
    /// Quota exhausted for a guest; offer sign-in
    AuthPromptRequested,
    /// Submission phase changed
    Phase(SubmissionPhase),
    /// Visible message list changed
    Ledger(LedgerChange),
    /// Streaming exchange status changed
    Stream(ExchangeStatus),
}
