//! Draft Store
//!
//! Keeps in-progress input text per conversation so it survives switching
//! between conversations. Writes come only from the single input field, so
//! last-write-wins is all the consistency needed.

use std::collections::HashMap;
use std::path::Path;

use dashmap::DashMap;
use thiserror::Error;

use crate::messages::ConversationId;

const NEW_CONVERSATION_KEY: &str = "chat-draft-new";
const CONVERSATION_KEY_PREFIX: &str = "chat-draft-";

/// Errors from draft snapshot persistence
#[derive(Debug, Error)]
pub enum DraftError {
    /// Snapshot file could not be read or written
    #[error("Draft snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot file is not valid JSON
    #[error("Draft snapshot is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

/// Key a draft is stored under
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DraftKey {
    /// A conversation that does not exist yet
    New,
    /// An existing conversation
    Conversation(ConversationId),
}

impl DraftKey {
    /// Key for an optional conversation
    #[must_use]
    pub fn for_conversation(conversation_id: Option<&ConversationId>) -> Self {
        conversation_id.map_or(Self::New, |id| Self::Conversation(id.clone()))
    }

    fn storage_key(&self) -> String {
        match self {
            Self::New => NEW_CONVERSATION_KEY.to_string(),
            Self::Conversation(id) => format!("{CONVERSATION_KEY_PREFIX}{id}"),
        }
    }

    fn from_storage_key(key: &str) -> Option<Self> {
        if key == NEW_CONVERSATION_KEY {
            return Some(Self::New);
        }
        key.strip_prefix(CONVERSATION_KEY_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|id| Self::Conversation(ConversationId::new(id)))
    }
}

/// In-progress input text, keyed by conversation
#[derive(Debug, Default)]
pub struct DraftStore {
    drafts: DashMap<DraftKey, String>,
}

impl DraftStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text saved for a key, empty if none
    #[must_use]
    pub fn load(&self, key: &DraftKey) -> String {
        self.drafts
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Save text for a key; empty text removes the entry
    pub fn save(&self, key: &DraftKey, text: &str) {
        if text.is_empty() {
            self.drafts.remove(key);
        } else {
            self.drafts.insert(key.clone(), text.to_string());
        }
    }

    /// Forget the draft for a key
    pub fn clear(&self, key: &DraftKey) {
        self.drafts.remove(key);
    }

    /// Number of stored drafts
    #[must_use]
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    /// Whether no drafts are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Write all drafts to a JSON snapshot
    ///
    /// # Errors
    ///
    /// Returns [`DraftError`] if the file cannot be written.
    pub async fn persist(&self, path: &Path) -> Result<(), DraftError> {
        let snapshot: HashMap<String, String> = self
            .drafts
            .iter()
            .map(|entry| (entry.key().storage_key(), entry.value().clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;

        tracing::debug!(path = %path.display(), drafts = snapshot.len(), "Drafts persisted");
        Ok(())
    }

    /// Merge drafts from a JSON snapshot; a missing file restores nothing
    ///
    /// # Errors
    ///
    /// Returns [`DraftError`] if the file exists but cannot be read or parsed.
    pub async fn restore(&self, path: &Path) -> Result<usize, DraftError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let snapshot: HashMap<String, String> = serde_json::from_slice(&bytes)?;

        let mut restored = 0;
        for (key, text) in snapshot {
            match DraftKey::from_storage_key(&key) {
                Some(draft_key) => {
                    self.save(&draft_key, &text);
                    restored += 1;
                }
                None => tracing::warn!(key = %key, "Skipping unrecognized draft key"),
            }
        }
        Ok(restored)
    }
}
