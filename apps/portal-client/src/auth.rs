//! Authentication-readiness signal consumed by the subscription layer.
//!
//! The engine never issues or validates tokens; it only observes the single
//! gating condition `(ready && authenticated && user id present)` published
//! by the excluded authentication layer.

use tokio::sync::watch;

/// A point-in-time view of the authentication state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthSnapshot {
    /// Whether the auth layer has finished its initial resolution.
    pub ready: bool,
    /// Whether a user is currently signed in.
    pub authenticated: bool,
    /// Stable user identifier, present only while signed in.
    pub user_id: Option<String>,
}

impl AuthSnapshot {
    /// The single gating condition for channel lifecycle.
    pub fn is_active(&self) -> bool {
        self.ready && self.authenticated && self.user_id.is_some()
    }

    pub fn active(user_id: impl Into<String>) -> Self {
        Self {
            ready: true,
            authenticated: true,
            user_id: Some(user_id.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            ready: true,
            authenticated: false,
            user_id: None,
        }
    }
}

/// Cloneable handle to the auth-readiness watch channel.
///
/// The auth layer calls `set`; sync components call `snapshot` / `subscribe`.
#[derive(Clone)]
pub struct AuthSignal {
    tx: std::sync::Arc<watch::Sender<AuthSnapshot>>,
}

impl AuthSignal {
    /// New signal in the not-ready state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthSnapshot::default());
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn set(&self, snapshot: AuthSnapshot) {
        self.tx.send_replace(snapshot);
    }

    pub fn set_active(&self, user_id: &str) {
        self.set(AuthSnapshot::active(user_id));
    }

    pub fn set_signed_out(&self) {
        self.set(AuthSnapshot::signed_out());
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for AuthSignal {
    fn default() -> Self {
        Self::new()
    }
}
