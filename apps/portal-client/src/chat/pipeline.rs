//! Optimistic send pipeline: Composing → Sending → {Reconciled | RolledBack}.
//!
//! On submit the pipeline appends a provisional message immediately, then
//! either replaces it with the authoritative record (matched by correlation
//! id, never by content) or removes it entirely on failure. Sends within one
//! room are serialized so a second send cannot start until the first reaches
//! a terminal state, which preserves message order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use anchorhost_common::id::{prefix, prefixed_ulid};

use crate::api::{OutgoingMessage, PortalApi};
use crate::cache::QueryCache;
use crate::error::SyncError;
use crate::models::{Attachment, AttachmentSource, ChatMessage, MessageIdentity, Sender};

use super::preview::PreviewRegistry;

struct RoomSend {
    /// FIFO mutex: queued senders resolve in submission order.
    lock: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
}

pub struct OptimisticMessagePipeline {
    api: Arc<dyn PortalApi>,
    cache: Arc<QueryCache>,
    previews: Arc<PreviewRegistry>,
    rooms: DashMap<String, Arc<RoomSend>>,
}

impl OptimisticMessagePipeline {
    pub fn new(
        api: Arc<dyn PortalApi>,
        cache: Arc<QueryCache>,
        previews: Arc<PreviewRegistry>,
    ) -> Self {
        Self {
            api,
            cache,
            previews,
            rooms: DashMap::new(),
        }
    }

    pub fn previews(&self) -> &Arc<PreviewRegistry> {
        &self.previews
    }

    /// Whether a send is currently unresolved for this room.
    pub fn is_sending(&self, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .map(|entry| entry.in_flight.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn room_send(&self, room_id: &str) -> Arc<RoomSend> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                Arc::new(RoomSend {
                    lock: tokio::sync::Mutex::new(()),
                    in_flight: AtomicBool::new(false),
                })
            })
            .clone()
    }

    /// Submit a message. Resolves once the send reached a terminal state:
    /// `Ok` with the authoritative record after reconciliation, `Err` after
    /// the provisional entry was rolled back.
    pub async fn send(
        &self,
        room_id: &str,
        sender: Sender,
        draft: OutgoingMessage,
    ) -> Result<ChatMessage, SyncError> {
        if draft.is_empty() {
            return Err(SyncError::validation(
                "Message body or attachment is required",
            ));
        }

        let room_send = self.room_send(room_id);
        let _guard = room_send.lock.lock().await;
        room_send.in_flight.store(true, Ordering::Release);

        let result = self.send_locked(room_id, sender, draft).await;

        room_send.in_flight.store(false, Ordering::Release);
        result
    }

    async fn send_locked(
        &self,
        room_id: &str,
        sender: Sender,
        draft: OutgoingMessage,
    ) -> Result<ChatMessage, SyncError> {
        let correlation_id = prefixed_ulid(prefix::CORRELATION);

        let attachments: Vec<Attachment> = draft
            .attachments
            .iter()
            .map(|a| Attachment {
                name: a.name.clone(),
                size: a.size,
                mime_type: a.mime_type.clone(),
                source: AttachmentSource::Preview {
                    handle_id: self.previews.create(&a.name, &a.mime_type),
                },
            })
            .collect();

        let provisional = ChatMessage {
            identity: MessageIdentity::Provisional(correlation_id.clone()),
            body: draft.body.clone(),
            attachments,
            sender,
            created_at: Utc::now(),
        };

        let room = self.cache.room_messages(room_id);
        room.append_provisional(provisional.clone());
        tracing::debug!(%room_id, %correlation_id, "provisional message appended");

        match self
            .api
            .send_chat_message(room_id, &correlation_id, &draft)
            .await
        {
            Ok(confirmed) => {
                room.reconcile(&correlation_id, confirmed.clone());
                self.previews.release_for(&provisional);
                tracing::debug!(
                    %room_id,
                    %correlation_id,
                    message_id = ?confirmed.server_id(),
                    "send reconciled"
                );
                Ok(confirmed)
            }
            Err(err) => {
                room.remove_provisional(&correlation_id);
                self.previews.release_for(&provisional);
                tracing::warn!(%room_id, %correlation_id, %err, "send rolled back");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryPortalApi, OutgoingAttachment};
    use crate::models::SenderRole;
    use std::time::Duration;

    fn sender() -> Sender {
        Sender {
            id: "usr_1".to_string(),
            display_name: "Customer".to_string(),
            role: SenderRole::Client,
        }
    }

    fn pipeline() -> (Arc<OptimisticMessagePipeline>, Arc<MemoryPortalApi>, Arc<QueryCache>) {
        let api = Arc::new(MemoryPortalApi::new("usr_1"));
        let cache = Arc::new(QueryCache::new());
        let pipeline = Arc::new(OptimisticMessagePipeline::new(
            api.clone(),
            cache.clone(),
            Arc::new(PreviewRegistry::new()),
        ));
        (pipeline, api, cache)
    }

    #[tokio::test]
    async fn empty_draft_is_rejected() {
        let (pipeline, api, _cache) = pipeline();
        let room_id = api.room_id();

        let err = pipeline
            .send(&room_id, sender(), OutgoingMessage::text("   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert_eq!(api.send_count(), 0);
    }

    #[tokio::test]
    async fn happy_path_shows_provisional_then_confirmed() {
        let (pipeline, api, cache) = pipeline();
        let room_id = api.room_id();
        api.set_send_delay(Duration::from_millis(50));

        let task = {
            let pipeline = pipeline.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                pipeline
                    .send(&room_id, sender(), OutgoingMessage::text("Hello"))
                    .await
            })
        };

        // Mid-flight: exactly one provisional entry is visible.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let room = cache.room_messages(&room_id);
        assert_eq!(room.len(), 1);
        assert_eq!(room.provisional_count(), 1);
        assert!(pipeline.is_sending(&room_id));

        let confirmed = task.await.unwrap().unwrap();
        assert_eq!(confirmed.body, "Hello");
        assert!(!confirmed.is_provisional());

        // Terminal: exactly one entry, confirmed, same text — never both.
        assert_eq!(room.len(), 1);
        assert_eq!(room.provisional_count(), 0);
        assert_eq!(room.snapshot()[0].body, "Hello");
        assert!(!pipeline.is_sending(&room_id));
    }

    #[tokio::test]
    async fn failed_send_rolls_back_entirely() {
        let (pipeline, api, cache) = pipeline();
        let room_id = api.room_id();
        let room = cache.room_messages(&room_id);

        api.fail_next_send(SyncError::network("connection reset"));

        let draft = OutgoingMessage {
            body: String::new(),
            attachments: vec![OutgoingAttachment {
                name: "photo.png".to_string(),
                size: 2048,
                mime_type: "image/png".to_string(),
            }],
        };

        let err = pipeline.send(&room_id, sender(), draft).await.unwrap_err();
        assert!(err.is_retryable());

        // List back to its pre-send length, no dangling preview handles.
        assert_eq!(room.len(), 0);
        assert_eq!(pipeline.previews().live_count(), 0);
        assert!(!pipeline.is_sending(&room_id));
    }

    #[tokio::test]
    async fn previews_are_released_on_reconcile() {
        let (pipeline, api, _cache) = pipeline();
        let room_id = api.room_id();

        let draft = OutgoingMessage {
            body: "with file".to_string(),
            attachments: vec![OutgoingAttachment {
                name: "doc.pdf".to_string(),
                size: 100,
                mime_type: "application/pdf".to_string(),
            }],
        };

        let confirmed = pipeline.send(&room_id, sender(), draft).await.unwrap();
        assert_eq!(pipeline.previews().live_count(), 0);
        assert!(matches!(
            confirmed.attachments[0].source,
            AttachmentSource::Remote { .. }
        ));
    }

    #[tokio::test]
    async fn sends_are_serialized_per_room() {
        let (pipeline, api, cache) = pipeline();
        let room_id = api.room_id();
        api.set_send_delay(Duration::from_millis(40));

        let first = {
            let pipeline = pipeline.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                pipeline
                    .send(&room_id, sender(), OutgoingMessage::text("first"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let pipeline = pipeline.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                pipeline
                    .send(&room_id, sender(), OutgoingMessage::text("second"))
                    .await
            })
        };

        // While the first send is unresolved, the second has not started.
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(api.send_count(), 1);

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let bodies: Vec<String> = cache
            .room_messages(&room_id)
            .snapshot()
            .iter()
            .map(|m| m.body.clone())
            .collect();
        assert_eq!(bodies, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn push_messages_do_not_disturb_an_in_flight_send() {
        let (pipeline, api, cache) = pipeline();
        let room_id = api.room_id();
        api.set_send_delay(Duration::from_millis(40));

        let task = {
            let pipeline = pipeline.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                pipeline
                    .send(&room_id, sender(), OutgoingMessage::text("mine"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A message from the other party arrives via push mid-send.
        let room = cache.room_messages(&room_id);
        let remote = ChatMessage {
            identity: MessageIdentity::Confirmed {
                id: "msg_remote".to_string(),
                correlation_id: None,
            },
            body: "mine".to_string(), // identical text, different sender
            attachments: Vec::new(),
            sender: Sender {
                id: "usr_agent".to_string(),
                display_name: "Agent".to_string(),
                role: SenderRole::Agent,
            },
            created_at: Utc::now(),
        };
        room.append_confirmed(remote);

        task.await.unwrap().unwrap();

        // Both messages survive: the remote one and our reconciled send.
        assert_eq!(room.len(), 2);
        assert_eq!(room.provisional_count(), 0);
    }
}
