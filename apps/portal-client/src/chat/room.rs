//! The in-memory ordered message list for one support room.
//!
//! This is the one cached collection with two writers: the optimistic
//! pipeline (provisional entries) and the push path (confirmed entries).
//! Provisional mutators are crate-private so nothing outside the pipeline
//! can write speculative state; every replacement happens under one lock,
//! so the visible list never holds a provisional and its confirmed
//! counterpart at the same time.

use parking_lot::Mutex;

use crate::models::ChatMessage;

/// What `append_confirmed` did with an incoming push-path message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New message, appended at the tail.
    Appended,
    /// The message confirmed one of our in-flight sends; the provisional
    /// entry was replaced in place.
    SupersededProvisional,
    /// Already present (at-least-once delivery); nothing changed.
    Duplicate,
}

struct RoomInner {
    messages: Vec<ChatMessage>,
    stale: bool,
    generation: u64,
    loaded: bool,
}

pub struct RoomMessages {
    room_id: String,
    inner: Mutex<RoomInner>,
}

impl RoomMessages {
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            inner: Mutex::new(RoomInner {
                messages: Vec::new(),
                stale: true,
                generation: 0,
                loaded: false,
            }),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    pub fn provisional_count(&self) -> usize {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.is_provisional())
            .count()
    }

    /// Whether the confirmed portion has ever been loaded from the server.
    pub fn is_loaded(&self) -> bool {
        self.inner.lock().loaded
    }

    pub fn is_stale(&self) -> bool {
        self.inner.lock().stale
    }

    /// Number of fresh→stale transitions. Lets tests assert that duplicate
    /// push deliveries trigger exactly one invalidation.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Mark the list stale. Idempotent: returns true only on the
    /// fresh→stale transition.
    pub(crate) fn mark_stale(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.stale {
            return false;
        }
        inner.stale = true;
        inner.generation += 1;
        true
    }

    /// Pipeline only: append a provisional entry at the tail.
    pub(crate) fn append_provisional(&self, message: ChatMessage) {
        debug_assert!(message.is_provisional());
        self.inner.lock().messages.push(message);
    }

    /// Pipeline only: replace the provisional matched by correlation id with
    /// its authoritative record. Matching is by correlation id, never by
    /// content. Returns true if a provisional was replaced.
    pub(crate) fn reconcile(&self, correlation_id: &str, confirmed: ChatMessage) -> bool {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner
            .messages
            .iter()
            .position(|m| m.is_provisional() && m.correlation_id() == Some(correlation_id))
        {
            inner.messages[idx] = confirmed;
            return true;
        }

        // The push path may have delivered the confirmed record before the
        // HTTP acknowledgment resolved; correlation id is the matching key,
        // so a confirmed entry carrying it means we are already reconciled.
        if inner
            .messages
            .iter()
            .any(|m| !m.is_provisional() && m.correlation_id() == Some(correlation_id))
        {
            return false;
        }
        let id = confirmed.server_id().map(str::to_string);
        if let Some(id) = id {
            if inner.messages.iter().any(|m| m.server_id() == Some(id.as_str())) {
                return false;
            }
        }
        inner.messages.push(confirmed);
        false
    }

    /// Pipeline only: drop a provisional entry on send failure.
    pub(crate) fn remove_provisional(&self, correlation_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.messages.len();
        inner
            .messages
            .retain(|m| !(m.is_provisional() && m.correlation_id() == Some(correlation_id)));
        inner.messages.len() < before
    }

    /// Push path: append a confirmed message, deduplicating by server id and
    /// superseding a provisional only on correlation-id match.
    pub(crate) fn append_confirmed(&self, message: ChatMessage) -> AppendOutcome {
        debug_assert!(!message.is_provisional());
        let mut inner = self.inner.lock();

        if let Some(id) = message.server_id() {
            if inner.messages.iter().any(|m| m.server_id() == Some(id)) {
                return AppendOutcome::Duplicate;
            }
        }

        if let Some(correlation) = message.correlation_id().map(str::to_string) {
            if let Some(idx) = inner
                .messages
                .iter()
                .position(|m| m.is_provisional() && m.correlation_id() == Some(correlation.as_str()))
            {
                inner.messages[idx] = message;
                return AppendOutcome::SupersededProvisional;
            }
        }

        inner.messages.push(message);
        AppendOutcome::Appended
    }

    /// Fetch path: replace the confirmed portion with the server's list,
    /// retaining in-flight provisionals at the tail. A provisional whose
    /// correlation id already appears in the server list is dropped — its
    /// confirmed counterpart is in the fresh data.
    pub(crate) fn sync_from_server(&self, confirmed: Vec<ChatMessage>) {
        let mut inner = self.inner.lock();

        let provisional: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| {
                m.is_provisional()
                    && !confirmed
                        .iter()
                        .any(|c| c.correlation_id() == m.correlation_id())
            })
            .cloned()
            .collect();

        inner.messages = confirmed;
        inner.messages.extend(provisional);
        inner.stale = false;
        inner.loaded = true;
    }
}
