//! Maps incoming (channel, event-name) pairs to reactions.
//!
//! Every event invalidates its resource class's cache entries — side effects
//! like toasts are additive, never a substitute for invalidation. Delivery is
//! at-least-once, so dispatch dedupes by event id and every reaction is
//! idempotent.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::api::WireMessage;
use crate::cache::{CacheKey, QueryCache};

use super::transport::PushEvent;

/// Recently-seen event ids kept for defensive dedup.
const DEDUP_CAPACITY: usize = 1024;

/// Capacity of the toast broadcast channel.
const TOAST_CAPACITY: usize = 64;

/// Event names delivered by the push service.
pub struct EventName;

impl EventName {
    /// Generic notification event; the payload carries the semantic type.
    pub const NOTIFICATION_NEW: &'static str = "notification.new";
    pub const SERVICE_PURCHASED: &'static str = "service.purchased";
    pub const PAYMENT_FAILED: &'static str = "payment.failed";
    pub const TICKET_REPLIED: &'static str = "ticket.replied";
    pub const CHAT_MESSAGE_NEW: &'static str = "chat.message.new";
    pub const CHAT_ROOM_UPDATED: &'static str = "chat.room.updated";
}

/// Channel-name derivation and classification. Names are deterministic
/// functions of the owning entity id.
pub mod channel {
    use super::ChannelClass;

    pub fn for_user(user_id: &str) -> String {
        format!("user.{user_id}")
    }

    pub fn for_room(room_id: &str) -> String {
        format!("chat.{room_id}")
    }

    pub fn class_of(channel: &str) -> Option<ChannelClass> {
        if let Some(user_id) = channel.strip_prefix("user.") {
            if !user_id.is_empty() {
                return Some(ChannelClass::User {
                    user_id: user_id.to_string(),
                });
            }
        }
        if let Some(room_id) = channel.strip_prefix("chat.") {
            if !room_id.is_empty() {
                return Some(ChannelClass::Chat {
                    room_id: room_id.to_string(),
                });
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelClass {
    User { user_id: String },
    Chat { room_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-visible side effect emitted alongside (never instead of) cache
/// invalidation.
#[derive(Debug, Clone)]
pub struct Toast {
    pub severity: ToastSeverity,
    pub title: String,
    pub detail: Option<String>,
}

/// What dispatching one event does to the cache and the user.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub invalidate: Vec<CacheKey>,
    pub toast: Option<Toast>,
}

/// The static reaction table. Pure: independently unit-testable.
///
/// Unknown event names still invalidate their channel class's entries so the
/// next read reflects server truth.
pub fn reaction_for(class: &ChannelClass, event_name: &str, data: &Value) -> Reaction {
    let detail = data
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);

    match class {
        ChannelClass::User { .. } => {
            let invalidate = vec![CacheKey::Notifications, CacheKey::UnreadCount];
            let toast = match event_name {
                EventName::SERVICE_PURCHASED => Some(Toast {
                    severity: ToastSeverity::Success,
                    title: "Service activated".to_string(),
                    detail,
                }),
                EventName::PAYMENT_FAILED => Some(Toast {
                    severity: ToastSeverity::Error,
                    title: "Payment failed".to_string(),
                    detail,
                }),
                EventName::TICKET_REPLIED => Some(Toast {
                    severity: ToastSeverity::Info,
                    title: "Support replied".to_string(),
                    detail,
                }),
                _ => None,
            };
            Reaction { invalidate, toast }
        }
        ChannelClass::Chat { room_id } => {
            let invalidate = match event_name {
                EventName::CHAT_ROOM_UPDATED => vec![CacheKey::SupportRoom],
                _ => vec![
                    CacheKey::ChatMessages(room_id.clone()),
                    CacheKey::ChatUnread(room_id.clone()),
                ],
            };
            Reaction {
                invalidate,
                toast: None,
            }
        }
    }
}

struct SeenRing {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenRing {
    fn new() -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns false if the id was already seen. Evicts the oldest entry once
    /// the ring exceeds capacity.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > DEDUP_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }
}

pub struct EventDispatchRouter {
    cache: Arc<QueryCache>,
    toasts: broadcast::Sender<Toast>,
    seen: Mutex<SeenRing>,
}

impl EventDispatchRouter {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        let (toasts, _) = broadcast::channel(TOAST_CAPACITY);
        Self {
            cache,
            toasts,
            seen: Mutex::new(SeenRing::new()),
        }
    }

    /// Subscribe to user-visible side effects. Dropped when nobody listens.
    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.toasts.subscribe()
    }

    pub fn dispatch(&self, event: &PushEvent) {
        let Some(class) = channel::class_of(&event.channel) else {
            tracing::debug!(channel = %event.channel, "event on unclassified channel dropped");
            return;
        };

        if let Some(id) = &event.id {
            if !self.seen.lock().insert(id) {
                tracing::trace!(event_id = %id, "duplicate push event dropped");
                return;
            }
        }

        // The push path appends confirmed chat messages directly; everything
        // else below only invalidates.
        if let ChannelClass::Chat { room_id } = &class {
            if event.name == EventName::CHAT_MESSAGE_NEW {
                match serde_json::from_value::<WireMessage>(event.data.clone()) {
                    Ok(wire) => {
                        let outcome = self
                            .cache
                            .room_messages(room_id)
                            .append_confirmed(wire.into_message());
                        tracing::debug!(%room_id, ?outcome, "push message ingested");
                    }
                    Err(err) => {
                        tracing::warn!(%room_id, ?err, "unparseable chat message payload");
                    }
                }
            }
        }

        let reaction = reaction_for(&class, &event.name, &event.data);
        for key in &reaction.invalidate {
            self.cache.invalidate(key);
        }
        if let Some(toast) = reaction.toast {
            let _ = self.toasts.send(toast);
        }
    }
}
