//! Vendor-agnostic push-transport contract.
//!
//! The engine never assumes a particular real-time vendor; it relies only on
//! connect/disconnect, per-channel subscribe, and named-event delivery.
//! Delivery is at-least-once, and channel subscriptions do NOT survive a
//! reconnect — the subscription manager re-arms them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::SyncError;

/// Capacity of the transport broadcast channels. Slow receivers that fall
/// behind skip events (RecvError::Lagged); the polling fallback covers them.
const EVENT_CAPACITY: usize = 1024;

/// A named event delivered on a subscribed channel.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub channel: String,
    pub name: String,
    /// Delivery id when the vendor provides one; used for defensive dedup.
    pub id: Option<String>,
    pub data: Value,
}

/// Connection-level lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    /// The transport dropped and re-established the connection. Channel
    /// subscriptions did not survive.
    Reconnected,
    Error(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<(), SyncError>;
    async fn disconnect(&self);
    /// Arm a channel on the transport. Callers own idempotence/refcounting.
    async fn subscribe(&self, channel: &str) -> Result<(), SyncError>;
    async fn unsubscribe(&self, channel: &str);
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
    fn events(&self) -> broadcast::Receiver<Arc<PushEvent>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / offline development)
// ---------------------------------------------------------------------------

struct MemoryInner {
    connected: bool,
    armed: HashSet<String>,
    subscribe_calls: HashMap<String, usize>,
    fail_subscribe: bool,
}

/// In-memory `PushTransport` that mimics vendor semantics: events are only
/// delivered for armed channels, and a reconnect forgets every subscription.
pub struct MemoryTransport {
    inner: Mutex<MemoryInner>,
    conn_tx: broadcast::Sender<ConnectionEvent>,
    event_tx: broadcast::Sender<Arc<PushEvent>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (conn_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(MemoryInner {
                connected: false,
                armed: HashSet::new(),
                subscribe_calls: HashMap::new(),
                fail_subscribe: false,
            }),
            conn_tx,
            event_tx,
        }
    }

    /// Deliver an event to subscribers of `channel`. Silently dropped when
    /// the connection is down or the channel is not armed, like a real
    /// vendor would.
    pub fn emit(&self, channel: &str, name: &str, id: Option<&str>, data: Value) {
        {
            let inner = self.inner.lock();
            if !inner.connected || !inner.armed.contains(channel) {
                return;
            }
        }
        let _ = self.event_tx.send(Arc::new(PushEvent {
            channel: channel.to_string(),
            name: name.to_string(),
            id: id.map(str::to_string),
            data,
        }));
    }

    /// Simulate a connection drop + re-establish. Armed channels are lost.
    pub fn simulate_reconnect(&self) {
        self.inner.lock().armed.clear();
        let _ = self.conn_tx.send(ConnectionEvent::Reconnected);
    }

    pub fn simulate_error(&self, message: &str) {
        let _ = self.conn_tx.send(ConnectionEvent::Error(message.to_string()));
    }

    /// Make subsequent `subscribe` calls fail until cleared.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.lock().fail_subscribe = fail;
    }

    pub fn is_armed(&self, channel: &str) -> bool {
        self.inner.lock().armed.contains(channel)
    }

    pub fn armed_count(&self) -> usize {
        self.inner.lock().armed.len()
    }

    /// How many times `subscribe` was invoked for a channel, across the
    /// transport's lifetime. Test hook for the refcounting property.
    pub fn subscribe_calls(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .subscribe_calls
            .get(channel)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), SyncError> {
        self.inner.lock().connected = true;
        let _ = self.conn_tx.send(ConnectionEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.armed.clear();
    }

    async fn subscribe(&self, channel: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        *inner
            .subscribe_calls
            .entry(channel.to_string())
            .or_insert(0) += 1;
        if inner.fail_subscribe {
            return Err(SyncError::network("subscription refused"));
        }
        inner.armed.insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) {
        self.inner.lock().armed.remove(channel);
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn_tx.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<Arc<PushEvent>> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_only_delivered_for_armed_channels() {
        let transport = MemoryTransport::new();
        let mut rx = transport.events();

        transport.connect().await.unwrap();
        transport.emit("user.u1", "notification.new", None, Value::Null);
        assert!(rx.try_recv().is_err());

        transport.subscribe("user.u1").await.unwrap();
        transport.emit("user.u1", "notification.new", None, Value::Null);
        assert_eq!(rx.try_recv().unwrap().name, "notification.new");
    }

    #[tokio::test]
    async fn reconnect_forgets_subscriptions() {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();
        transport.subscribe("user.u1").await.unwrap();
        assert!(transport.is_armed("user.u1"));

        transport.simulate_reconnect();
        assert!(!transport.is_armed("user.u1"));
    }

    #[tokio::test]
    async fn subscribe_failures_are_reported_and_counted() {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();
        transport.set_fail_subscribe(true);

        assert!(transport.subscribe("user.u1").await.is_err());
        assert_eq!(transport.subscribe_calls("user.u1"), 1);
        assert!(!transport.is_armed("user.u1"));
    }
}
