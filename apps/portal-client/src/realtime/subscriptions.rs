//! Reference-counted channel subscriptions over the push transport.
//!
//! A channel is armed on the transport at most once no matter how many
//! components hold it, and torn down only when the last holder releases.
//! Subscriptions are gated on the auth-readiness signal and re-armed after
//! every reconnect, because the transport does not keep bindings alive
//! across one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::auth::AuthSignal;

use super::transport::{ConnectionEvent, PushTransport};

/// Proof of a held subscription. Consumed by `release`, so a handle cannot
/// be double-released.
#[derive(Debug)]
pub struct SubscriptionHandle {
    channel: String,
    #[allow(dead_code)]
    token: u64,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

struct ChannelEntry {
    refcount: usize,
    /// Event names consumers asked for on this channel.
    events: HashSet<String>,
    /// Whether the transport-level subscription is currently live.
    armed: bool,
}

pub struct ChannelSubscriptionManager {
    transport: Arc<dyn PushTransport>,
    auth: AuthSignal,
    channels: DashMap<String, Mutex<ChannelEntry>>,
    next_token: AtomicU64,
}

impl ChannelSubscriptionManager {
    pub fn new(transport: Arc<dyn PushTransport>, auth: AuthSignal) -> Self {
        Self {
            transport,
            auth,
            channels: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Attach to a channel, arming it on the transport if this is the first
    /// holder. Refuses (logged no-op) when the channel name is empty or the
    /// auth gate is closed; real-time delivery then degrades to polling.
    pub async fn subscribe(
        &self,
        channel_name: &str,
        event_names: &[&str],
    ) -> Option<SubscriptionHandle> {
        if channel_name.is_empty() {
            tracing::warn!("refusing subscription to empty channel name");
            return None;
        }
        if !self.auth.snapshot().is_active() {
            tracing::warn!(channel = %channel_name, "refusing subscription: auth not ready");
            return None;
        }

        let needs_arm = {
            let entry = self
                .channels
                .entry(channel_name.to_string())
                .or_insert_with(|| {
                    Mutex::new(ChannelEntry {
                        refcount: 0,
                        events: HashSet::new(),
                        armed: false,
                    })
                });
            let mut e = entry.lock();
            e.refcount += 1;
            e.events.extend(event_names.iter().map(|s| s.to_string()));
            if e.armed {
                false
            } else {
                // Claimed optimistically so a concurrent subscriber doesn't
                // arm the same channel twice; reverted if the transport
                // refuses.
                e.armed = true;
                true
            }
        };

        if needs_arm {
            if let Err(err) = self.transport.subscribe(channel_name).await {
                tracing::warn!(channel = %channel_name, %err, "transport subscription failed; will retry on next connect");
                if let Some(entry) = self.channels.get(channel_name) {
                    entry.lock().armed = false;
                }
            } else {
                tracing::debug!(channel = %channel_name, "channel armed");
            }
        }

        Some(SubscriptionHandle {
            channel: channel_name.to_string(),
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Detach one holder. The transport subscription is torn down only when
    /// the reference count reaches zero. Releasing after a logout sweep is a
    /// harmless no-op.
    pub async fn release(&self, handle: SubscriptionHandle) {
        let channel = handle.channel;
        let last = match self.channels.get(&channel) {
            Some(entry) => {
                let mut e = entry.lock();
                e.refcount = e.refcount.saturating_sub(1);
                e.refcount == 0
            }
            None => {
                tracing::debug!(channel = %channel, "release for already-cleared channel");
                return;
            }
        };

        if last {
            self.channels
                .remove_if(&channel, |_, entry| entry.lock().refcount == 0);
            self.transport.unsubscribe(&channel).await;
            tracing::debug!(channel = %channel, "channel released");
        }
    }

    pub fn reference_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|entry| entry.lock().refcount)
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.reference_count(channel) > 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Arm channels whose transport subscription is not live (initial
    /// connect, or an earlier subscribe failure being retried passively).
    pub async fn arm_pending(&self) {
        let pending: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| !entry.value().lock().armed)
            .map(|entry| entry.key().clone())
            .collect();
        self.arm_channels(pending).await;
    }

    /// Re-arm every held channel. Run after a reconnect: the transport
    /// forgot all bindings, whatever our flags said.
    pub async fn re_arm_all(&self) {
        let all: Vec<String> = self
            .channels
            .iter()
            .map(|entry| {
                entry.value().lock().armed = false;
                entry.key().clone()
            })
            .collect();
        tracing::info!(channels = all.len(), "re-arming subscriptions after reconnect");
        self.arm_channels(all).await;
    }

    async fn arm_channels(&self, names: Vec<String>) {
        for name in names {
            match self.transport.subscribe(&name).await {
                Ok(()) => {
                    if let Some(entry) = self.channels.get(&name) {
                        entry.lock().armed = true;
                    }
                }
                Err(err) => {
                    tracing::warn!(channel = %name, %err, "re-arm failed; will retry on next connect");
                }
            }
        }
    }

    /// Drop every subscription. Run when the auth signal goes inactive, so a
    /// later sign-in starts from a clean slate with no stale handlers.
    pub async fn clear_all(&self) {
        let names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        self.channels.clear();
        for name in &names {
            self.transport.unsubscribe(name).await;
        }
        if !names.is_empty() {
            tracing::info!(channels = names.len(), "released all channel subscriptions");
        }
    }

    /// React to connection lifecycle and auth transitions until the
    /// transport goes away.
    pub async fn run(self: Arc<Self>) {
        let mut conn_rx = self.transport.connection_events();
        let mut auth_rx = self.auth.subscribe();

        loop {
            tokio::select! {
                event = conn_rx.recv() => match event {
                    Ok(ConnectionEvent::Connected) => self.arm_pending().await,
                    Ok(ConnectionEvent::Reconnected) => self.re_arm_all().await,
                    Ok(ConnectionEvent::Error(message)) => {
                        tracing::warn!(%message, "transport error; holding subscriptions");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "connection event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let active = auth_rx.borrow_and_update().is_active();
                    if !active && self.channel_count() > 0 {
                        self.clear_all().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::transport::MemoryTransport;

    fn manager() -> (Arc<ChannelSubscriptionManager>, Arc<MemoryTransport>, AuthSignal) {
        let transport = Arc::new(MemoryTransport::new());
        let auth = AuthSignal::new();
        auth.set_active("usr_1");
        let manager = Arc::new(ChannelSubscriptionManager::new(transport.clone(), auth.clone()));
        (manager, transport, auth)
    }

    #[tokio::test]
    async fn refuses_when_auth_not_ready() {
        let transport = Arc::new(MemoryTransport::new());
        let auth = AuthSignal::new();
        let manager = ChannelSubscriptionManager::new(transport.clone(), auth);

        transport.connect().await.unwrap();
        let handle = manager.subscribe("user.u1", &["notification.new"]).await;
        assert!(handle.is_none());
        assert_eq!(transport.subscribe_calls("user.u1"), 0);
    }

    #[tokio::test]
    async fn refuses_empty_channel_name() {
        let (manager, transport, _auth) = manager();
        transport.connect().await.unwrap();
        assert!(manager.subscribe("", &[]).await.is_none());
    }

    #[tokio::test]
    async fn transport_subscription_happens_exactly_once() {
        let (manager, transport, _auth) = manager();
        transport.connect().await.unwrap();

        let a = manager.subscribe("user.u1", &["notification.new"]).await.unwrap();
        let b = manager.subscribe("user.u1", &["payment.failed"]).await.unwrap();

        assert_eq!(manager.reference_count("user.u1"), 2);
        assert_eq!(transport.subscribe_calls("user.u1"), 1);
        assert!(transport.is_armed("user.u1"));

        manager.release(a).await;
        assert!(transport.is_armed("user.u1"));
        assert_eq!(manager.reference_count("user.u1"), 1);

        manager.release(b).await;
        assert!(!transport.is_armed("user.u1"));
        assert_eq!(manager.reference_count("user.u1"), 0);
    }

    #[tokio::test]
    async fn failed_subscribe_is_retried_on_next_connect() {
        let (manager, transport, _auth) = manager();
        transport.connect().await.unwrap();
        transport.set_fail_subscribe(true);

        // Subscription is held even though the transport refused.
        let _handle = manager.subscribe("user.u1", &[]).await.unwrap();
        assert!(manager.is_subscribed("user.u1"));
        assert!(!transport.is_armed("user.u1"));

        transport.set_fail_subscribe(false);
        manager.arm_pending().await;
        assert!(transport.is_armed("user.u1"));
    }

    #[tokio::test]
    async fn reconnect_rearms_every_channel() {
        let (manager, transport, _auth) = manager();
        transport.connect().await.unwrap();

        let _a = manager.subscribe("user.u1", &[]).await.unwrap();
        let _b = manager.subscribe("chat.room_1", &[]).await.unwrap();

        transport.simulate_reconnect();
        assert_eq!(transport.armed_count(), 0);

        manager.re_arm_all().await;
        assert!(transport.is_armed("user.u1"));
        assert!(transport.is_armed("chat.room_1"));
        assert_eq!(transport.subscribe_calls("user.u1"), 2);
    }

    #[tokio::test]
    async fn clear_all_releases_everything() {
        let (manager, transport, _auth) = manager();
        transport.connect().await.unwrap();

        let handle = manager.subscribe("user.u1", &[]).await.unwrap();
        manager.clear_all().await;

        assert_eq!(manager.channel_count(), 0);
        assert!(!transport.is_armed("user.u1"));

        // Releasing a handle from before the sweep is a no-op.
        manager.release(handle).await;
        assert_eq!(manager.channel_count(), 0);
    }

    #[tokio::test]
    async fn auth_logout_sweeps_subscriptions_via_run_loop() {
        let (manager, transport, auth) = manager();
        transport.connect().await.unwrap();
        let _handle = manager.subscribe("user.u1", &[]).await.unwrap();

        let run = tokio::spawn(manager.clone().run());

        auth.set_signed_out();
        // Give the run loop a chance to observe the transition.
        for _ in 0..50 {
            if manager.channel_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(manager.channel_count(), 0);
        assert!(!transport.is_armed("user.u1"));

        run.abort();
    }
}
