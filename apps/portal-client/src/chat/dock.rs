//! Session-scoped chat dock state machine: Closed → Open → {Minimized ⇄ Open} → Closed.
//!
//! Transitions are purely local UI state and carry no network side effects.
//! Message state lives in `RoomMessages`, so minimizing or re-opening the
//! dock never refetches or loses history.

use parking_lot::Mutex;

/// The conversation the dock is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversation {
    Ticket(String),
    SupportRoom(String),
}

impl Conversation {
    /// The chat room backing this conversation.
    pub fn room_id(&self) -> &str {
        match self {
            Conversation::Ticket(id) | Conversation::SupportRoom(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockState {
    Closed,
    Open,
    Minimized,
}

struct DockInner {
    state: DockState,
    /// Retained across close so re-opening the same conversation is free.
    conversation: Option<Conversation>,
}

pub struct ChatDockController {
    inner: Mutex<DockInner>,
}

impl ChatDockController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DockInner {
                state: DockState::Closed,
                conversation: None,
            }),
        }
    }

    pub fn state(&self) -> DockState {
        self.inner.lock().state
    }

    /// Whether the dock is visible (open or minimized).
    pub fn is_open(&self) -> bool {
        self.inner.lock().state != DockState::Closed
    }

    pub fn is_minimized(&self) -> bool {
        self.inner.lock().state == DockState::Minimized
    }

    pub fn conversation(&self) -> Option<Conversation> {
        self.inner.lock().conversation.clone()
    }

    /// Open the dock on a conversation, restoring from any state.
    pub fn open(&self, conversation: Conversation) {
        let mut inner = self.inner.lock();
        inner.state = DockState::Open;
        inner.conversation = Some(conversation);
    }

    pub fn close(&self) {
        self.inner.lock().state = DockState::Closed;
    }

    /// Minimize or restore. A no-op while the dock is closed.
    pub fn set_minimized(&self, minimized: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            DockState::Closed => {}
            DockState::Open | DockState::Minimized => {
                inner.state = if minimized {
                    DockState::Minimized
                } else {
                    DockState::Open
                };
            }
        }
    }
}

impl Default for ChatDockController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support_room() -> Conversation {
        Conversation::SupportRoom("room_1".to_string())
    }

    #[test]
    fn starts_closed_with_no_conversation() {
        let dock = ChatDockController::new();
        assert_eq!(dock.state(), DockState::Closed);
        assert!(!dock.is_open());
        assert!(dock.conversation().is_none());
    }

    #[test]
    fn open_minimize_restore_close() {
        let dock = ChatDockController::new();

        dock.open(support_room());
        assert_eq!(dock.state(), DockState::Open);
        assert!(dock.is_open());
        assert!(!dock.is_minimized());

        dock.set_minimized(true);
        assert_eq!(dock.state(), DockState::Minimized);
        assert!(dock.is_open());

        dock.set_minimized(false);
        assert_eq!(dock.state(), DockState::Open);

        dock.close();
        assert_eq!(dock.state(), DockState::Closed);
    }

    #[test]
    fn minimize_while_closed_is_a_noop() {
        let dock = ChatDockController::new();
        dock.set_minimized(true);
        assert_eq!(dock.state(), DockState::Closed);
    }

    #[test]
    fn conversation_survives_close() {
        let dock = ChatDockController::new();
        dock.open(Conversation::Ticket("ticket_7".to_string()));
        dock.close();

        // Re-opening the same conversation needs no new reference.
        assert_eq!(
            dock.conversation(),
            Some(Conversation::Ticket("ticket_7".to_string()))
        );
    }

    #[test]
    fn opening_a_new_conversation_replaces_the_reference() {
        let dock = ChatDockController::new();
        dock.open(support_room());
        dock.open(Conversation::Ticket("ticket_2".to_string()));
        assert_eq!(dock.conversation().unwrap().room_id(), "ticket_2");
    }
}
