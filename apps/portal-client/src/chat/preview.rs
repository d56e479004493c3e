//! Registry of transient attachment preview handles.
//!
//! While a message is provisional, its attachments render from locally-owned
//! preview handles built from the raw file descriptors. Handles are released
//! on reconcile and on rollback; a nonzero live count after a send reached a
//! terminal state is a leak.

use dashmap::DashMap;

use anchorhost_common::id::{prefix, prefixed_ulid};

use crate::models::{AttachmentSource, ChatMessage};

#[derive(Debug, Clone)]
pub struct PreviewEntry {
    pub name: String,
    pub mime_type: String,
}

pub struct PreviewRegistry {
    live: DashMap<String, PreviewEntry>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
        }
    }

    /// Register a preview for a raw file and return its handle id.
    pub fn create(&self, name: &str, mime_type: &str) -> String {
        let handle_id = prefixed_ulid(prefix::ATTACHMENT);
        self.live.insert(
            handle_id.clone(),
            PreviewEntry {
                name: name.to_string(),
                mime_type: mime_type.to_string(),
            },
        );
        handle_id
    }

    pub fn release(&self, handle_id: &str) -> bool {
        self.live.remove(handle_id).is_some()
    }

    /// Release every preview handle a message's attachments point at.
    pub fn release_for(&self, message: &ChatMessage) {
        for attachment in &message.attachments {
            if let AttachmentSource::Preview { handle_id } = &attachment.source {
                self.release(handle_id);
            }
        }
    }

    pub fn get(&self, handle_id: &str) -> Option<PreviewEntry> {
        self.live.get(handle_id).map(|e| e.value().clone())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Default for PreviewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, MessageIdentity, Sender, SenderRole};
    use chrono::Utc;

    #[test]
    fn create_and_release() {
        let registry = PreviewRegistry::new();
        let handle = registry.create("photo.png", "image/png");

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.get(&handle).unwrap().name, "photo.png");

        assert!(registry.release(&handle));
        assert!(!registry.release(&handle));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn release_for_walks_preview_attachments_only() {
        let registry = PreviewRegistry::new();
        let handle = registry.create("doc.pdf", "application/pdf");

        let message = ChatMessage {
            identity: MessageIdentity::Provisional("cor_1".to_string()),
            body: String::new(),
            attachments: vec![
                Attachment {
                    name: "doc.pdf".to_string(),
                    size: 42,
                    mime_type: "application/pdf".to_string(),
                    source: AttachmentSource::Preview {
                        handle_id: handle.clone(),
                    },
                },
                Attachment {
                    name: "old.png".to_string(),
                    size: 7,
                    mime_type: "image/png".to_string(),
                    source: AttachmentSource::Remote {
                        url: "https://cdn/old".to_string(),
                    },
                },
            ],
            sender: Sender {
                id: "usr_1".to_string(),
                display_name: "Customer".to_string(),
                role: SenderRole::Client,
            },
            created_at: Utc::now(),
        };

        registry.release_for(&message);
        assert_eq!(registry.live_count(), 0);
    }
}
