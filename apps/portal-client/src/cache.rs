//! Key/value store of previously fetched server resources.
//!
//! The cache is invalidate-only for every actor except the fetch path (REST
//! responses store fresh values) and the optimistic pipeline (which writes
//! provisional entries through `RoomMessages`). Invalidation marks a resource
//! stale and lets the next read re-fetch from the authoritative source; it
//! never patches cached values in place, so concurrent push invalidations and
//! in-flight REST responses cannot lose updates — whichever completes last
//! wins a fresh value.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::chat::room::RoomMessages;
use crate::models::{Notification, SupportRoom};

/// Capacity of the invalidation broadcast. Refetchers that lag simply skip
/// notifications; staleness flags remain authoritative.
const INVALIDATION_CAPACITY: usize = 256;

/// Addressable cached resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Notifications,
    UnreadCount,
    SupportRoom,
    ChatMessages(String),
    /// Per-room unread badge. The cache keeps only the staleness ledger for
    /// this key — the badge itself is derived by the presentation layer from
    /// the refreshed message list and read marker.
    ChatUnread(String),
}

struct Entry<T> {
    value: Option<T>,
    stale: bool,
    generation: u64,
}

impl<T> Entry<T> {
    fn new() -> Self {
        Self {
            value: None,
            stale: true,
            generation: 0,
        }
    }

    /// Returns true only on the fresh→stale transition.
    fn invalidate(&mut self) -> bool {
        if self.stale {
            return false;
        }
        self.stale = true;
        self.generation += 1;
        true
    }

    fn store(&mut self, value: T) {
        self.value = Some(value);
        self.stale = false;
    }
}

#[derive(Default)]
struct Ledger {
    stale: bool,
    generation: u64,
}

pub struct QueryCache {
    notifications: RwLock<Entry<Vec<Notification>>>,
    unread_count: RwLock<Entry<u64>>,
    support_room: RwLock<Entry<SupportRoom>>,
    chat_unread: DashMap<String, Ledger>,
    rooms: DashMap<String, Arc<RoomMessages>>,
    invalidations: broadcast::Sender<CacheKey>,
}

impl QueryCache {
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CAPACITY);
        Self {
            notifications: RwLock::new(Entry::new()),
            unread_count: RwLock::new(Entry::new()),
            support_room: RwLock::new(Entry::new()),
            chat_unread: DashMap::new(),
            rooms: DashMap::new(),
            invalidations,
        }
    }

    /// Subscribe to invalidation notifications. Only fresh→stale transitions
    /// are broadcast; re-invalidating an already-stale entry is a no-op.
    pub fn invalidations(&self) -> broadcast::Receiver<CacheKey> {
        self.invalidations.subscribe()
    }

    /// Mark a resource stale, forcing the next read to re-fetch. Idempotent.
    pub fn invalidate(&self, key: &CacheKey) {
        let transitioned = match key {
            CacheKey::Notifications => self.notifications.write().invalidate(),
            CacheKey::UnreadCount => self.unread_count.write().invalidate(),
            CacheKey::SupportRoom => self.support_room.write().invalidate(),
            CacheKey::ChatMessages(room_id) => self
                .rooms
                .get(room_id)
                .map(|room| room.mark_stale())
                .unwrap_or(false),
            CacheKey::ChatUnread(room_id) => {
                let mut ledger = self.chat_unread.entry(room_id.clone()).or_default();
                if ledger.stale {
                    false
                } else {
                    ledger.stale = true;
                    ledger.generation += 1;
                    true
                }
            }
        };

        if transitioned {
            tracing::trace!(?key, "cache entry invalidated");
            // send() fails when nobody is listening — that's fine.
            let _ = self.invalidations.send(key.clone());
        }
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        match key {
            CacheKey::Notifications => self.notifications.read().stale,
            CacheKey::UnreadCount => self.unread_count.read().stale,
            CacheKey::SupportRoom => self.support_room.read().stale,
            CacheKey::ChatMessages(room_id) => self
                .rooms
                .get(room_id)
                .map(|room| room.is_stale())
                .unwrap_or(true),
            CacheKey::ChatUnread(room_id) => self
                .chat_unread
                .get(room_id)
                .map(|ledger| ledger.stale)
                .unwrap_or(true),
        }
    }

    /// Number of fresh→stale transitions for a key. Test hook for the
    /// "duplicate delivery invalidates exactly once" property.
    pub fn generation(&self, key: &CacheKey) -> u64 {
        match key {
            CacheKey::Notifications => self.notifications.read().generation,
            CacheKey::UnreadCount => self.unread_count.read().generation,
            CacheKey::SupportRoom => self.support_room.read().generation,
            CacheKey::ChatMessages(room_id) => self
                .rooms
                .get(room_id)
                .map(|room| room.generation())
                .unwrap_or(0),
            CacheKey::ChatUnread(room_id) => self
                .chat_unread
                .get(room_id)
                .map(|ledger| ledger.generation)
                .unwrap_or(0),
        }
    }

    // -- fetch-path stores --------------------------------------------------

    pub fn notifications(&self) -> Option<Vec<Notification>> {
        self.notifications.read().value.clone()
    }

    pub(crate) fn store_notifications(&self, value: Vec<Notification>) {
        self.notifications.write().store(value);
    }

    pub fn unread_count(&self) -> Option<u64> {
        self.unread_count.read().value
    }

    pub(crate) fn store_unread_count(&self, value: u64) {
        self.unread_count.write().store(value);
    }

    pub fn support_room(&self) -> Option<SupportRoom> {
        self.support_room.read().value.clone()
    }

    pub(crate) fn store_support_room(&self, value: SupportRoom) {
        self.support_room.write().store(value);
    }

    pub(crate) fn mark_chat_unread_fresh(&self, room_id: &str) {
        self.chat_unread.entry(room_id.to_string()).or_default().stale = false;
    }

    /// The live message list for a room, created on first access. All callers
    /// share one instance, which is what lets the dock re-open a conversation
    /// without losing or re-fetching history.
    pub fn room_messages(&self, room_id: &str) -> Arc<RoomMessages> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(RoomMessages::new(room_id)))
            .clone()
    }

    /// Explicit-delete support: the one mutation that removes locally before
    /// the re-fetch lands. The unread count is still only invalidated.
    pub(crate) fn remove_notification(&self, id: &str) {
        let mut entry = self.notifications.write();
        if let Some(items) = entry.value.as_mut() {
            items.retain(|n| n.id != id);
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}
