//! Explicitly owned wrapper around the push-transport connection.
//!
//! One instance per client, constructed at startup and torn down at logout.
//! Transport errors are logged and contained here; they never reach UI code.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::SyncError;

use super::transport::{ConnectionEvent, PushEvent, PushTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

pub struct RealtimeConnection {
    transport: Arc<dyn PushTransport>,
    state: Mutex<ConnectionState>,
}

impl RealtimeConnection {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub async fn connect(&self) -> Result<(), SyncError> {
        self.transport.connect().await?;
        *self.state.lock() = ConnectionState::Connected;
        tracing::info!("realtime connection established");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        *self.state.lock() = ConnectionState::Disconnected;
        tracing::info!("realtime connection closed");
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn transport(&self) -> Arc<dyn PushTransport> {
        self.transport.clone()
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.transport.connection_events()
    }

    pub fn events(&self) -> broadcast::Receiver<Arc<PushEvent>> {
        self.transport.events()
    }

    /// Track connection-level events for state introspection and logging.
    /// Errors are recorded at warn and swallowed — loss of real-time delivery
    /// degrades to the polling fallback, it never crashes anything.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.transport.connection_events();
        loop {
            match rx.recv().await {
                Ok(ConnectionEvent::Connected) => {
                    *self.state.lock() = ConnectionState::Connected;
                }
                Ok(ConnectionEvent::Reconnected) => {
                    *self.state.lock() = ConnectionState::Connected;
                    tracing::info!("realtime connection re-established");
                }
                Ok(ConnectionEvent::Error(message)) => {
                    tracing::warn!(%message, "realtime connection error");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "connection event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
