//! Attachment Coordination
//!
//! Staged files become placeholders with a local preview handle the moment
//! the user hits send, so the optimistic message can show them. Each batch of
//! placeholders ends exactly one way: promoted after a successful upload, or
//! released on rollback. Either way its preview handles are revoked before
//! the submission attempt finishes.
//!
//! Uploads are all-or-nothing: one failed file fails the batch.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::identity::Identity;
use crate::messages::{Attachment, ConversationId};

/// Scheme used for local preview handles
pub const PREVIEW_SCHEME: &str = "preview://";

/// A file picked by the user, not yet uploaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    /// File name
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// File contents
    pub data: Vec<u8>,
}

impl LocalFile {
    /// Create a local file
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }
}

/// A durable attachment reference returned by the upload collaborator
pub type PersistedAttachment = Attachment;

/// A locally previewable, not yet durable attachment
///
/// Deliberately not `Clone`: promotion and release consume it.
#[derive(Debug, PartialEq, Eq)]
pub struct PlaceholderAttachment {
    name: String,
    content_type: String,
    preview: u64,
}

impl PlaceholderAttachment {
    /// The preview URL shown while the message is optimistic
    #[must_use]
    pub fn preview_url(&self) -> String {
        format!("{PREVIEW_SCHEME}{}", self.preview)
    }

    /// Reference carried by the optimistic message
    #[must_use]
    pub fn as_attachment(&self) -> Attachment {
        Attachment {
            name: self.name.clone(),
            content_type: self.content_type.clone(),
            url: self.preview_url(),
        }
    }
}

/// Attachment-upload collaborator
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Upload every file, returning one durable reference per file in order
    async fn upload(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
        files: &[LocalFile],
    ) -> anyhow::Result<Vec<PersistedAttachment>>;
}

/// Conservation counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttachmentStats {
    /// Placeholders created
    pub staged: usize,
    /// Placeholders promoted after upload
    pub promoted: usize,
    /// Placeholders released without promotion
    pub released: usize,
    /// Preview handles not yet revoked
    pub live_previews: usize,
}

/// Stages, uploads, promotes and releases attachments
pub struct AttachmentCoordinator {
    uploader: Arc<dyn AttachmentUploader>,
    next_preview: AtomicU64,
    live_previews: Mutex<HashSet<u64>>,
    staged: AtomicUsize,
    promoted: AtomicUsize,
    released: AtomicUsize,
}

impl AttachmentCoordinator {
    /// Create a coordinator around an upload collaborator
    pub fn new(uploader: Arc<dyn AttachmentUploader>) -> Self {
        Self {
            uploader,
            next_preview: AtomicU64::new(1),
            live_previews: Mutex::new(HashSet::new()),
            staged: AtomicUsize::new(0),
            promoted: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Build placeholders for the given files (no I/O)
    pub fn stage(&self, files: &[LocalFile]) -> Vec<PlaceholderAttachment> {
        let mut live = self.live_previews.lock();
        let placeholders: Vec<_> = files
            .iter()
            .map(|file| {
                let preview = self.next_preview.fetch_add(1, Ordering::SeqCst);
                live.insert(preview);
                PlaceholderAttachment {
                    name: file.name.clone(),
                    content_type: file.content_type.clone(),
                    preview,
                }
            })
            .collect();
        self.staged.fetch_add(placeholders.len(), Ordering::SeqCst);
        placeholders
    }

    /// Upload a batch; `None` if any file failed
    pub async fn upload(
        &self,
        identity: &Identity,
        conversation_id: &ConversationId,
        files: &[LocalFile],
    ) -> Option<Vec<PersistedAttachment>> {
        match self.uploader.upload(identity, conversation_id, files).await {
            Ok(persisted) if persisted.len() == files.len() => Some(persisted),
            Ok(persisted) => {
                tracing::warn!(
                    expected = files.len(),
                    uploaded = persisted.len(),
                    "Partial attachment upload treated as failure"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, files = files.len(), "Attachment upload failed");
                None
            }
        }
    }

    /// Promote placeholders after a successful upload, revoking their previews
    pub fn promote(
        &self,
        placeholders: Vec<PlaceholderAttachment>,
        persisted: Vec<PersistedAttachment>,
    ) -> Vec<PersistedAttachment> {
        let revoked = self.revoke(&placeholders);
        self.promoted.fetch_add(revoked, Ordering::SeqCst);
        persisted
    }

    /// Release placeholders that will never be promoted
    pub fn release(&self, placeholders: Vec<PlaceholderAttachment>) {
        let revoked = self.revoke(&placeholders);
        self.released.fetch_add(revoked, Ordering::SeqCst);
    }

    fn revoke(&self, placeholders: &[PlaceholderAttachment]) -> usize {
        let mut live = self.live_previews.lock();
        placeholders
            .iter()
            .filter(|p| {
                let was_live = live.remove(&p.preview);
                if !was_live {
                    tracing::warn!(preview = p.preview, "Preview handle revoked twice");
                }
                was_live
            })
            .count()
    }

    /// Current conservation counters
    #[must_use]
    pub fn stats(&self) -> AttachmentStats {
        AttachmentStats {
            staged: self.staged.load(Ordering::SeqCst),
            promoted: self.promoted.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            live_previews: self.live_previews.lock().len(),
        }
    }
}
