//! Polling fallback: fixed-interval refresh independent of push delivery.
//!
//! Correctness never depends on the push path; a dropped real-time
//! connection only costs latency until the next tick.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;

use crate::auth::AuthSignal;
use crate::chat::controller::ChatController;
use crate::notifications::feed::NotificationFeed;

pub struct Poller {
    auth: AuthSignal,
    feed: Arc<NotificationFeed>,
    rooms: Mutex<Vec<Weak<ChatController>>>,
    interval: Duration,
}

impl Poller {
    pub fn new(auth: AuthSignal, feed: Arc<NotificationFeed>, interval: Duration) -> Self {
        Self {
            auth,
            feed,
            rooms: Mutex::new(Vec::new()),
            interval,
        }
    }

    /// Include a room in the periodic refresh for as long as its controller
    /// is alive.
    pub fn register_room(&self, controller: &Arc<ChatController>) {
        self.rooms.lock().push(Arc::downgrade(controller));
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = time::interval(self.interval);
        ticker.tick().await; // First tick fires immediately; skip it.

        loop {
            ticker.tick().await;
            if !self.auth.snapshot().is_active() {
                continue;
            }

            let _ = self.feed.refresh().await;

            let rooms: Vec<Arc<ChatController>> = {
                let mut slots = self.rooms.lock();
                slots.retain(|weak| weak.strong_count() > 0);
                slots.iter().filter_map(Weak::upgrade).collect()
            };
            for room in rooms {
                if let Err(err) = room.refresh().await {
                    tracing::warn!(room_id = %room.room_id(), %err, "poll refresh failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryPortalApi;
    use crate::cache::QueryCache;
    use crate::models::NotificationKind;
    use crate::realtime::subscriptions::ChannelSubscriptionManager;
    use crate::realtime::transport::{MemoryTransport, PushTransport};

    #[tokio::test]
    async fn tick_refreshes_the_feed_when_auth_is_active() {
        let api = Arc::new(MemoryPortalApi::new("usr_1"));
        let cache = Arc::new(QueryCache::new());
        let transport = Arc::new(MemoryTransport::new());
        transport.connect().await.unwrap();
        let auth = AuthSignal::new();
        auth.set_active("usr_1");
        let subscriptions = Arc::new(ChannelSubscriptionManager::new(transport, auth.clone()));
        let feed = Arc::new(NotificationFeed::new(
            api.clone(),
            cache.clone(),
            auth.clone(),
            subscriptions,
        ));
        api.seed_notification(NotificationKind::InvoiceGenerated, "Invoice");

        let poller = Arc::new(Poller::new(auth, feed.clone(), Duration::from_millis(20)));
        let task = tokio::spawn(poller.run());

        for _ in 0..50 {
            if !feed.items().is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(feed.items().len(), 1);

        task.abort();
    }
}
