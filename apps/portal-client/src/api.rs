//! The excluded HTTP/CRUD layer, seen from the engine's side of the seam.
//!
//! `PortalApi` is the black-box contract the sync core consumes. Backed by
//! the portal REST backend in production and an in-memory implementation in
//! tests and offline development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use anchorhost_common::id::{prefix, prefixed_ulid};

use crate::error::SyncError;
use crate::models::{
    Attachment, AttachmentSource, ChatMessage, MessageIdentity, Notification, RoomStatus, Sender,
    SenderRole, SupportRoom,
};

/// A message draft as submitted by the user: body text and raw attachment
/// descriptors. Upload mechanics belong to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub body: String,
    pub attachments: Vec<OutgoingAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingAttachment {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl OutgoingMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    /// A draft is sendable when it has text or at least one attachment.
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.attachments.is_empty()
    }
}

#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SyncError>;
    async fn fetch_unread_count(&self) -> Result<u64, SyncError>;
    async fn mark_notification_read(&self, id: &str) -> Result<(), SyncError>;
    async fn mark_all_notifications_read(&self) -> Result<(), SyncError>;
    async fn delete_notification(&self, id: &str) -> Result<(), SyncError>;
    async fn fetch_support_room(&self) -> Result<SupportRoom, SyncError>;
    async fn fetch_chat_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, SyncError>;
    /// `correlation_id` is client-generated and echoed back on the
    /// authoritative record so the caller can match it to its provisional.
    async fn send_chat_message(
        &self,
        room_id: &str,
        correlation_id: &str,
        outgoing: &OutgoingMessage,
    ) -> Result<ChatMessage, SyncError>;
    async fn mark_chat_read(&self, room_id: &str) -> Result<(), SyncError>;
    async fn close_chat_room(&self, room_id: &str) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Error envelope returned by the portal backend. Carries a human-readable
/// message but no structured code.
#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireAttachment {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub url: String,
}

/// A confirmed message as the backend serializes it.
#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    pub id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

impl WireMessage {
    pub(crate) fn into_message(self) -> ChatMessage {
        ChatMessage {
            identity: MessageIdentity::Confirmed {
                id: self.id,
                correlation_id: self.correlation_id,
            },
            body: self.body,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    name: a.name,
                    size: a.size,
                    mime_type: a.mime_type,
                    source: AttachmentSource::Remote { url: a.url },
                })
                .collect(),
            sender: self.sender,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NotificationListResponse {
    notifications: Vec<Notification>,
}

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    unread_count: u64,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    messages: Vec<WireMessage>,
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// `PortalApi` over the portal REST backend.
#[derive(Clone)]
pub struct HttpPortalApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPortalApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response to a `SyncError` kind. The backend contract
    /// carries only a free-text message, so classification happens here.
    async fn error_from(resp: reqwest::Response) -> SyncError {
        let status = resp.status();
        let message = resp
            .json::<WireErrorBody>()
            .await
            .map(|b| b.error.message)
            .unwrap_or_else(|_| format!("HTTP {status}"));

        match status.as_u16() {
            400 | 422 => SyncError::validation(message),
            409 => SyncError::conflict(message),
            _ => SyncError::unknown(message),
        }
    }

    async fn expect_no_content(resp: reqwest::Response) -> Result<(), SyncError> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(resp).await)
        }
    }
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SyncError> {
        let resp = self
            .http
            .get(self.url("/api/v1/notifications"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body: NotificationListResponse = resp.json().await?;
        Ok(body.notifications)
    }

    async fn fetch_unread_count(&self) -> Result<u64, SyncError> {
        let resp = self
            .http
            .get(self.url("/api/v1/notifications/unread-count"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body: UnreadCountResponse = resp.json().await?;
        Ok(body.unread_count)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .put(self.url(&format!("/api/v1/notifications/{id}/read")))
            .send()
            .await?;
        Self::expect_no_content(resp).await
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        let resp = self
            .http
            .put(self.url("/api/v1/notifications/read-all"))
            .send()
            .await?;
        Self::expect_no_content(resp).await
    }

    async fn delete_notification(&self, id: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/v1/notifications/{id}")))
            .send()
            .await?;
        Self::expect_no_content(resp).await
    }

    async fn fetch_support_room(&self) -> Result<SupportRoom, SyncError> {
        let resp = self.http.get(self.url("/api/v1/support/room")).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn fetch_chat_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, SyncError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/support/rooms/{room_id}/messages")))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body: MessageListResponse = resp.json().await?;
        Ok(body.messages.into_iter().map(WireMessage::into_message).collect())
    }

    async fn send_chat_message(
        &self,
        room_id: &str,
        correlation_id: &str,
        outgoing: &OutgoingMessage,
    ) -> Result<ChatMessage, SyncError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/support/rooms/{room_id}/messages")))
            .json(&serde_json::json!({
                "correlation_id": correlation_id,
                "body": outgoing.body,
                "attachments": outgoing.attachments,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let wire: WireMessage = resp.json().await?;
        Ok(wire.into_message())
    }

    async fn mark_chat_read(&self, room_id: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .put(self.url(&format!("/api/v1/support/rooms/{room_id}/read")))
            .send()
            .await?;
        Self::expect_no_content(resp).await
    }

    async fn close_chat_room(&self, room_id: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/support/rooms/{room_id}/close")))
            .send()
            .await?;
        Self::expect_no_content(resp).await
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / offline development)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CallCounters {
    sends: usize,
    mark_read: usize,
    mark_all_read: usize,
    deletes: usize,
    mark_chat_read: usize,
    fetch_messages: usize,
}

struct MemoryState {
    me: Sender,
    notifications: Vec<Notification>,
    room: SupportRoom,
    messages: HashMap<String, Vec<ChatMessage>>,
    send_delay: Option<Duration>,
    fail_next_send: Option<SyncError>,
    fail_mutations: Option<SyncError>,
    counters: CallCounters,
}

/// In-memory `PortalApi` with failure and latency injection hooks.
pub struct MemoryPortalApi {
    state: Mutex<MemoryState>,
}

impl MemoryPortalApi {
    pub fn new(user_id: &str) -> Self {
        let me = Sender {
            id: user_id.to_string(),
            display_name: "Customer".to_string(),
            role: SenderRole::Client,
        };
        let room = SupportRoom {
            id: prefixed_ulid(prefix::ROOM),
            status: RoomStatus::Open,
            participant_id: user_id.to_string(),
        };
        Self {
            state: Mutex::new(MemoryState {
                me,
                notifications: Vec::new(),
                room,
                messages: HashMap::new(),
                send_delay: None,
                fail_next_send: None,
                fail_mutations: None,
                counters: CallCounters::default(),
            }),
        }
    }

    pub fn room_id(&self) -> String {
        self.state.lock().room.id.clone()
    }

    pub fn seed_notification(&self, kind: crate::models::NotificationKind, title: &str) -> String {
        let id = prefixed_ulid(prefix::NOTIFICATION);
        self.state.lock().notifications.push(Notification {
            id: id.clone(),
            kind,
            payload: crate::models::NotificationPayload {
                title: title.to_string(),
                message: String::new(),
                references: serde_json::Value::Null,
            },
            created_at: Utc::now(),
            read_at: None,
        });
        id
    }

    /// Append a confirmed message as if the other party had sent it.
    pub fn seed_remote_message(&self, room_id: &str, body: &str, sender: Sender) -> ChatMessage {
        let message = ChatMessage {
            identity: MessageIdentity::Confirmed {
                id: prefixed_ulid(prefix::MESSAGE),
                correlation_id: None,
            },
            body: body.to_string(),
            attachments: Vec::new(),
            sender,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .messages
            .entry(room_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    pub fn fail_next_send(&self, error: SyncError) {
        self.state.lock().fail_next_send = Some(error);
    }

    pub fn fail_mutations(&self, error: SyncError) {
        self.state.lock().fail_mutations = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_next_send = None;
        state.fail_mutations = None;
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().counters.sends
    }

    pub fn mark_chat_read_count(&self) -> usize {
        self.state.lock().counters.mark_chat_read
    }

    pub fn fetch_messages_count(&self) -> usize {
        self.state.lock().counters.fetch_messages
    }

    fn mutation_gate(&self) -> Result<(), SyncError> {
        if let Some(err) = self.state.lock().fail_mutations.clone() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl PortalApi for MemoryPortalApi {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SyncError> {
        Ok(self.state.lock().notifications.clone())
    }

    async fn fetch_unread_count(&self) -> Result<u64, SyncError> {
        // Always derived from the authoritative set, never stored separately.
        Ok(self
            .state
            .lock()
            .notifications
            .iter()
            .filter(|n| n.is_unread())
            .count() as u64)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), SyncError> {
        self.mutation_gate()?;
        let mut state = self.state.lock();
        state.counters.mark_read += 1;
        let found = state.notifications.iter_mut().find(|n| n.id == id);
        match found {
            // read_at is monotonic: a second mark leaves the first timestamp.
            Some(n) => {
                if n.read_at.is_none() {
                    n.read_at = Some(Utc::now());
                }
                Ok(())
            }
            None => Err(SyncError::unknown("Notification not found")),
        }
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        self.mutation_gate()?;
        let mut state = self.state.lock();
        state.counters.mark_all_read += 1;
        let now = Utc::now();
        for n in &mut state.notifications {
            if n.read_at.is_none() {
                n.read_at = Some(now);
            }
        }
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), SyncError> {
        self.mutation_gate()?;
        let mut state = self.state.lock();
        state.counters.deletes += 1;
        let before = state.notifications.len();
        state.notifications.retain(|n| n.id != id);
        if state.notifications.len() == before {
            return Err(SyncError::unknown("Notification not found"));
        }
        Ok(())
    }

    async fn fetch_support_room(&self) -> Result<SupportRoom, SyncError> {
        Ok(self.state.lock().room.clone())
    }

    async fn fetch_chat_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, SyncError> {
        let mut state = self.state.lock();
        state.counters.fetch_messages += 1;
        Ok(state.messages.get(room_id).cloned().unwrap_or_default())
    }

    async fn send_chat_message(
        &self,
        room_id: &str,
        correlation_id: &str,
        outgoing: &OutgoingMessage,
    ) -> Result<ChatMessage, SyncError> {
        let delay = {
            let mut state = self.state.lock();
            // Counted at entry so callers can observe when a send started.
            state.counters.sends += 1;
            state.send_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_send.take() {
            return Err(err);
        }

        let message = ChatMessage {
            identity: MessageIdentity::Confirmed {
                id: prefixed_ulid(prefix::MESSAGE),
                correlation_id: Some(correlation_id.to_string()),
            },
            body: outgoing.body.clone(),
            attachments: outgoing
                .attachments
                .iter()
                .map(|a| Attachment {
                    name: a.name.clone(),
                    size: a.size,
                    mime_type: a.mime_type.clone(),
                    source: AttachmentSource::Remote {
                        url: format!("memory://attachments/{}", a.name),
                    },
                })
                .collect(),
            sender: state.me.clone(),
            created_at: Utc::now(),
        };
        state
            .messages
            .entry(room_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_chat_read(&self, room_id: &str) -> Result<(), SyncError> {
        self.mutation_gate()?;
        let mut state = self.state.lock();
        state.counters.mark_chat_read += 1;
        if state.room.id != room_id {
            return Err(SyncError::unknown("Room not found"));
        }
        Ok(())
    }

    async fn close_chat_room(&self, room_id: &str) -> Result<(), SyncError> {
        self.mutation_gate()?;
        let mut state = self.state.lock();
        if state.room.id != room_id {
            return Err(SyncError::unknown("Room not found"));
        }
        state.room.status = RoomStatus::Closed;
        Ok(())
    }
}
