//! Read/unread transitions for notifications.
//!
//! These mutations carry no provisional state: the request goes out first,
//! and only a success invalidates the list and count caches — always as a
//! unit, and never replaced by local arithmetic, because a concurrent push
//! event may have changed the authoritative set in the interim. Invalidation
//! is commutative and idempotent, so rapid calls for different ids cannot
//! clobber each other.

use std::sync::Arc;

use crate::api::PortalApi;
use crate::cache::{CacheKey, QueryCache};
use crate::error::SyncError;

pub struct NotificationReadState {
    api: Arc<dyn PortalApi>,
    cache: Arc<QueryCache>,
}

impl NotificationReadState {
    pub fn new(api: Arc<dyn PortalApi>, cache: Arc<QueryCache>) -> Self {
        Self { api, cache }
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), SyncError> {
        self.api.mark_notification_read(id).await?;
        tracing::debug!(notification_id = %id, "notification marked read");
        self.invalidate_pair();
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), SyncError> {
        self.api.mark_all_notifications_read().await?;
        tracing::debug!("all notifications marked read");
        self.invalidate_pair();
        Ok(())
    }

    /// Delete is the one mutation that also removes the entry from the local
    /// cache immediately; the count is still only invalidated.
    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.api.delete_notification(id).await?;
        self.cache.remove_notification(id);
        tracing::debug!(notification_id = %id, "notification deleted");
        self.invalidate_pair();
        Ok(())
    }

    fn invalidate_pair(&self) {
        self.cache.invalidate(&CacheKey::Notifications);
        self.cache.invalidate(&CacheKey::UnreadCount);
    }
}
