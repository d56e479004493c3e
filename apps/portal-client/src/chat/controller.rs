//! Per-room chat accessor: the seam presentation code talks to.
//!
//! Owns the room's channel subscription for its own lifetime and delegates
//! all message state to the optimistic pipeline and `RoomMessages`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::{OutgoingMessage, PortalApi};
use crate::cache::{CacheKey, QueryCache};
use crate::error::SyncError;
use crate::models::{ChatMessage, Sender};
use crate::realtime::dispatch::{channel, EventName};
use crate::realtime::subscriptions::{ChannelSubscriptionManager, SubscriptionHandle};

use super::pipeline::OptimisticMessagePipeline;

pub struct ChatController {
    room_id: String,
    me: Sender,
    api: Arc<dyn PortalApi>,
    cache: Arc<QueryCache>,
    pipeline: Arc<OptimisticMessagePipeline>,
    subscriptions: Arc<ChannelSubscriptionManager>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl ChatController {
    pub fn new(
        room_id: &str,
        me: Sender,
        api: Arc<dyn PortalApi>,
        cache: Arc<QueryCache>,
        pipeline: Arc<OptimisticMessagePipeline>,
        subscriptions: Arc<ChannelSubscriptionManager>,
    ) -> Self {
        Self {
            room_id: room_id.to_string(),
            me,
            api,
            cache,
            pipeline,
            subscriptions,
            subscription: Mutex::new(None),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Subscribe to the room channel and load the initial message history.
    /// Safe to call again after a reconnect or sign-in; the subscription is
    /// refcounted and the load skipped when fresh.
    pub async fn attach(&self) -> Result<(), SyncError> {
        let already = self.subscription.lock().is_some();
        if !already {
            let handle = self
                .subscriptions
                .subscribe(
                    &channel::for_room(&self.room_id),
                    &[EventName::CHAT_MESSAGE_NEW, EventName::CHAT_ROOM_UPDATED],
                )
                .await;
            *self.subscription.lock() = handle;
        }
        self.refresh_if_stale().await
    }

    /// Release the room channel. Message history stays in memory.
    pub async fn detach(&self) {
        let handle = self.subscription.lock().take();
        if let Some(handle) = handle {
            self.subscriptions.release(handle).await;
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.cache.room_messages(&self.room_id).snapshot()
    }

    pub fn is_sending(&self) -> bool {
        self.pipeline.is_sending(&self.room_id)
    }

    pub async fn send(&self, draft: OutgoingMessage) -> Result<ChatMessage, SyncError> {
        self.pipeline
            .send(&self.room_id, self.me.clone(), draft)
            .await
    }

    /// Mark the room read server-side, then invalidate the unread badge.
    /// Local state is never mutated ahead of confirmation.
    pub async fn mark_read(&self) -> Result<(), SyncError> {
        self.api.mark_chat_read(&self.room_id).await?;
        self.cache
            .invalidate(&CacheKey::ChatUnread(self.room_id.clone()));
        Ok(())
    }

    pub async fn close(&self) -> Result<(), SyncError> {
        self.api.close_chat_room(&self.room_id).await?;
        self.cache.invalidate(&CacheKey::SupportRoom);
        self.cache
            .invalidate(&CacheKey::ChatUnread(self.room_id.clone()));
        Ok(())
    }

    /// Replace the confirmed history with the server's copy; in-flight
    /// provisional entries are retained.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let messages = self.api.fetch_chat_messages(&self.room_id).await?;
        self.cache.room_messages(&self.room_id).sync_from_server(messages);
        self.cache.mark_chat_unread_fresh(&self.room_id);
        Ok(())
    }

    pub async fn refresh_if_stale(&self) -> Result<(), SyncError> {
        if self.cache.room_messages(&self.room_id).is_stale() {
            self.refresh().await
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryPortalApi;
    use crate::auth::AuthSignal;
    use crate::chat::preview::PreviewRegistry;
    use crate::models::SenderRole;
    use crate::realtime::transport::{MemoryTransport, PushTransport};

    async fn controller() -> (ChatController, Arc<MemoryPortalApi>, Arc<MemoryTransport>) {
        let api = Arc::new(MemoryPortalApi::new("usr_1"));
        let cache = Arc::new(QueryCache::new());
        let transport = Arc::new(MemoryTransport::new());
        transport.connect().await.unwrap();
        let auth = AuthSignal::new();
        auth.set_active("usr_1");
        let subscriptions = Arc::new(ChannelSubscriptionManager::new(transport.clone(), auth));
        let pipeline = Arc::new(OptimisticMessagePipeline::new(
            api.clone(),
            cache.clone(),
            Arc::new(PreviewRegistry::new()),
        ));
        let me = Sender {
            id: "usr_1".to_string(),
            display_name: "Customer".to_string(),
            role: SenderRole::Client,
        };
        let room_id = api.room_id();
        (
            ChatController::new(&room_id, me, api.clone(), cache, pipeline, subscriptions),
            api,
            transport,
        )
    }

    fn agent() -> Sender {
        Sender {
            id: "usr_agent".to_string(),
            display_name: "Support".to_string(),
            role: SenderRole::Agent,
        }
    }

    #[tokio::test]
    async fn attach_subscribes_and_loads_history() {
        let (controller, api, transport) = controller().await;
        api.seed_remote_message(controller.room_id(), "welcome", agent());

        controller.attach().await.unwrap();

        assert!(transport.is_armed(&channel::for_room(controller.room_id())));
        assert_eq!(controller.messages().len(), 1);

        // A second attach holds a single subscription and skips the fetch.
        controller.attach().await.unwrap();
        assert_eq!(
            transport.subscribe_calls(&channel::for_room(controller.room_id())),
            1
        );
    }

    #[tokio::test]
    async fn detach_releases_the_channel_but_keeps_history() {
        let (controller, api, transport) = controller().await;
        api.seed_remote_message(controller.room_id(), "hi", agent());
        controller.attach().await.unwrap();

        controller.detach().await;
        assert!(!transport.is_armed(&channel::for_room(controller.room_id())));
        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn mark_read_invalidates_the_unread_badge() {
        let (controller, api, _transport) = controller().await;
        controller.attach().await.unwrap();
        let key = CacheKey::ChatUnread(controller.room_id().to_string());

        controller.mark_read().await.unwrap();
        assert_eq!(api.mark_chat_read_count(), 1);
        assert_eq!(controller.cache.generation(&key), 1);
    }

    #[tokio::test]
    async fn failed_mutation_surfaces_and_changes_nothing() {
        let (controller, api, _transport) = controller().await;
        controller.attach().await.unwrap();
        api.fail_mutations(SyncError::network("offline"));

        assert!(controller.mark_read().await.is_err());
        let key = CacheKey::ChatUnread(controller.room_id().to_string());
        assert_eq!(controller.cache.generation(&key), 0);
    }

    #[tokio::test]
    async fn close_invalidates_room_state() {
        let (controller, api, _transport) = controller().await;
        controller.attach().await.unwrap();

        controller.close().await.unwrap();
        let room = api.fetch_support_room().await.unwrap();
        assert!(!room.is_open());
    }
}
