//! Notification accessor for presentation code: cached items, unread count,
//! and the auth-gated `user.<id>` channel subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::api::PortalApi;
use crate::auth::AuthSignal;
use crate::cache::{CacheKey, QueryCache};
use crate::error::SyncError;
use crate::models::Notification;
use crate::realtime::dispatch::{channel, EventName};
use crate::realtime::subscriptions::{ChannelSubscriptionManager, SubscriptionHandle};

use super::read_state::NotificationReadState;

/// Events bound on the per-user channel.
const USER_CHANNEL_EVENTS: &[&str] = &[
    EventName::NOTIFICATION_NEW,
    EventName::SERVICE_PURCHASED,
    EventName::PAYMENT_FAILED,
    EventName::TICKET_REPLIED,
];

pub struct NotificationFeed {
    api: Arc<dyn PortalApi>,
    cache: Arc<QueryCache>,
    auth: AuthSignal,
    subscriptions: Arc<ChannelSubscriptionManager>,
    read_state: NotificationReadState,
    loading: AtomicBool,
    last_error: Mutex<Option<SyncError>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl NotificationFeed {
    pub fn new(
        api: Arc<dyn PortalApi>,
        cache: Arc<QueryCache>,
        auth: AuthSignal,
        subscriptions: Arc<ChannelSubscriptionManager>,
    ) -> Self {
        let read_state = NotificationReadState::new(api.clone(), cache.clone());
        Self {
            api,
            cache,
            auth,
            subscriptions,
            read_state,
            loading: AtomicBool::new(false),
            last_error: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    pub fn items(&self) -> Vec<Notification> {
        self.cache.notifications().unwrap_or_default()
    }

    pub fn unread_count(&self) -> u64 {
        self.cache.unread_count().unwrap_or(0)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.last_error.lock().clone()
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), SyncError> {
        self.read_state.mark_read(id).await
    }

    pub async fn mark_all_read(&self) -> Result<(), SyncError> {
        self.read_state.mark_all_read().await
    }

    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        self.read_state.delete(id).await
    }

    /// Fetch list and count together and store both. The count always comes
    /// from the authoritative source, never from counting the cached list.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.loading.store(true, Ordering::Release);
        let (items, count) = futures_util::join!(
            self.api.fetch_notifications(),
            self.api.fetch_unread_count()
        );
        self.loading.store(false, Ordering::Release);

        match (items, count) {
            (Ok(items), Ok(count)) => {
                self.cache.store_notifications(items);
                self.cache.store_unread_count(count);
                *self.last_error.lock() = None;
                Ok(())
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(%err, "notification refresh failed");
                *self.last_error.lock() = Some(err.clone());
                Err(err)
            }
        }
    }

    pub async fn refresh_if_stale(&self) -> Result<(), SyncError> {
        if self.cache.is_stale(&CacheKey::Notifications)
            || self.cache.is_stale(&CacheKey::UnreadCount)
        {
            self.refresh().await
        } else {
            Ok(())
        }
    }

    /// Subscribe the per-user channel if not already held. Refused by the
    /// manager while the auth gate is closed.
    pub async fn ensure_subscribed(&self) {
        if self.subscription.lock().is_some() {
            return;
        }
        let Some(user_id) = self.auth.snapshot().user_id else {
            return;
        };
        let handle = self
            .subscriptions
            .subscribe(&channel::for_user(&user_id), USER_CHANNEL_EVENTS)
            .await;
        *self.subscription.lock() = handle;
    }

    fn forget_subscription(&self) {
        // The manager already swept the transport side at sign-out; the
        // handle is just dropped.
        self.subscription.lock().take();
    }

    /// React to auth transitions and cache invalidations until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut auth_rx = self.auth.subscribe();
        let mut inval_rx = self.cache.invalidations();

        // The signal may already be active when the loop starts.
        if self.auth.snapshot().is_active() {
            self.ensure_subscribed().await;
            let _ = self.refresh().await;
        }

        loop {
            tokio::select! {
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let active = auth_rx.borrow_and_update().is_active();
                    if active {
                        self.ensure_subscribed().await;
                        let _ = self.refresh().await;
                    } else {
                        self.forget_subscription();
                    }
                }
                key = inval_rx.recv() => {
                    let mut relevant = match key {
                        Ok(CacheKey::Notifications) | Ok(CacheKey::UnreadCount) => true,
                        Ok(_) => false,
                        Err(broadcast::error::RecvError::Lagged(_)) => true,
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    // Drain the backlog so one burst triggers one refresh.
                    while let Ok(key) = inval_rx.try_recv() {
                        relevant |= matches!(key, CacheKey::Notifications | CacheKey::UnreadCount);
                    }
                    if relevant && self.auth.snapshot().is_active() {
                        let _ = self.refresh().await;
                    }
                }
            }
        }
    }
}
